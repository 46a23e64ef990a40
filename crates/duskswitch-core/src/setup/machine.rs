// ── Setup state machine ──
//
// Pure and synchronous: every input returns the effects the driver has to
// carry out. Steps only move forward, except through `back()`.

use crate::model::{EnvironmentSnapshot, SetupStep, StepFlags};

/// Work the driver performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Start (or restart) the auto-advance countdown with this many ticks.
    StartCountdown(u32),
    CancelCountdown,
    /// Run the completion transaction.
    Complete,
    /// Leave the flow without completing.
    Exit,
}

#[derive(Debug, Clone)]
pub struct SetupMachine {
    step: SetupStep,
    completed: StepFlags,
    triggered: StepFlags,
    countdown: u32,
    is_completed: bool,
    latest: EnvironmentSnapshot,
    auto_advance_ticks: u32,
}

impl SetupMachine {
    /// Build the machine from the first snapshot, skipping ahead where the
    /// environment already allows it.
    pub fn new(snapshot: EnvironmentSnapshot, auto_advance_ticks: u32) -> (Self, Vec<Effect>) {
        let mut machine = Self {
            step: SetupStep::DevMode,
            completed: StepFlags::default(),
            triggered: StepFlags::default(),
            countdown: 0,
            is_completed: false,
            latest: snapshot,
            auto_advance_ticks,
        };

        if snapshot.permission_granted {
            machine.completed = StepFlags::ALL;
            machine.triggered = StepFlags::ALL;
            machine.step = SetupStep::Grant;
            return (machine, vec![Effect::Complete]);
        }

        if snapshot.debugging_ready() {
            machine.completed.dev_mode = true;
            machine.triggered.dev_mode = true;
            machine.step = SetupStep::Connect;
        }
        (machine, Vec::new())
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn step(&self) -> SetupStep {
        self.step
    }

    pub fn completed_steps(&self) -> StepFlags {
        self.completed
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    pub fn latest(&self) -> EnvironmentSnapshot {
        self.latest
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// A new snapshot arrived.
    pub fn on_snapshot(&mut self, snapshot: EnvironmentSnapshot) -> Vec<Effect> {
        self.latest = snapshot;
        if self.is_completed {
            return Vec::new();
        }

        let satisfied = self.step.is_satisfied(&snapshot);
        self.completed.set(self.step, satisfied);

        if satisfied && !self.triggered.get(self.step) {
            self.triggered.set(self.step, true);
            self.countdown = self.auto_advance_ticks;
            return vec![Effect::StartCountdown(self.auto_advance_ticks)];
        }
        Vec::new()
    }

    /// The countdown reported `remaining` ticks left.
    pub fn on_countdown_tick(&mut self, remaining: u32) {
        if !self.is_completed {
            self.countdown = remaining;
        }
    }

    /// The countdown ran out uninterrupted.
    pub fn on_countdown_elapsed(&mut self) -> Vec<Effect> {
        self.countdown = 0;
        self.advance()
    }

    /// Manual "next": cancel any countdown and advance now.
    pub fn next(&mut self) -> Vec<Effect> {
        self.countdown = 0;
        let mut effects = vec![Effect::CancelCountdown];
        effects.extend(self.advance());
        effects
    }

    /// Manual "back". Leaving the first step exits the flow.
    pub fn back(&mut self) -> Vec<Effect> {
        self.countdown = 0;
        let mut effects = vec![Effect::CancelCountdown];
        if self.is_completed {
            return effects;
        }
        match self.step.previous() {
            Some(previous) => self.step = previous,
            None => effects.push(Effect::Exit),
        }
        effects
    }

    /// A successful grant was reported by an elevation strategy.
    pub fn on_grant_success(&mut self) -> Vec<Effect> {
        if self.is_completed {
            return Vec::new();
        }
        vec![Effect::CancelCountdown, Effect::Complete]
    }

    /// The permission was re-checked on demand.
    pub fn on_permission_check(&mut self, snapshot: EnvironmentSnapshot) -> Vec<Effect> {
        self.latest = snapshot;
        if self.is_completed || !snapshot.permission_granted {
            return Vec::new();
        }
        vec![Effect::CancelCountdown, Effect::Complete]
    }

    /// Record that the completion transaction ran.
    pub fn mark_completed(&mut self) {
        self.is_completed = true;
        self.completed = StepFlags::ALL;
        self.countdown = 0;
    }

    fn advance(&mut self) -> Vec<Effect> {
        if self.is_completed {
            return Vec::new();
        }
        match self.step.next() {
            Some(next) => {
                self.step = next;
                Vec::new()
            }
            // Completion on the last step requires the permission itself.
            None if self.latest.permission_granted => vec![Effect::Complete],
            None => Vec::new(),
        }
    }
}
