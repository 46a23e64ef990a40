// ── Setup flow driver ──
//
// One task owns the `SetupMachine`. It consumes snapshot changes from the
// EnvironmentMonitor, user actions from an mpsc channel (each carrying a
// oneshot reply), countdown events, finished grants and authorization
// outcomes, and publishes `SetupUiState` through a watch channel after
// every input. Grants run on their own tasks so ticks keep flowing while a
// call is in flight.

use std::sync::Arc;

use duskswitch_elevate::{AuthorizationOutcome, ElevationHost};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use super::completion::CompletionTransaction;
use super::countdown::{Countdown, CountdownEvent};
use super::machine::{Effect, SetupMachine};
use crate::channel::{ElevationChannel, host_instruction};
use crate::collaborators::{MonitoringService, PreferenceStore};
use crate::config::SetupConfig;
use crate::error::CoreError;
use crate::model::{GrantResult, Notice, SetupOutcome, SetupUiState};
use crate::monitor::{EnvironmentMonitor, EnvironmentProbes};

const ACTION_CHANNEL_SIZE: usize = 16;
const GRANT_CHANNEL_SIZE: usize = 4;

// ── Actions ──────────────────────────────────────────────────────────

/// UI entry points into the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupAction {
    NavigateNext,
    NavigateBack,
    ExitSetup,
    GrantViaElevationService,
    GrantViaSuperuser,
    CheckPermissionAndComplete,
    DismissNotice,
}

/// Answer to a [`SetupAction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReply {
    Done,
    Grant(GrantResult),
    /// Whether the permission is held right now.
    Permission(bool),
}

struct ActionEnvelope {
    action: SetupAction,
    response_tx: oneshot::Sender<ActionReply>,
}

enum GrantStrategy {
    ElevationService,
    Superuser,
}

struct GrantFinished {
    result: GrantResult,
    response_tx: Option<oneshot::Sender<ActionReply>>,
}

// ── SetupHandle ──────────────────────────────────────────────────────

/// Cloneable front door to a running flow.
#[derive(Clone)]
pub struct SetupHandle {
    action_tx: mpsc::Sender<ActionEnvelope>,
    state: watch::Receiver<SetupUiState>,
}

impl SetupHandle {
    pub async fn send(&self, action: SetupAction) -> Result<ActionReply, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.action_tx
            .send(ActionEnvelope {
                action,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::FlowStopped)?;
        rx.await.map_err(|_| CoreError::FlowStopped)
    }

    pub async fn navigate_next(&self) -> Result<(), CoreError> {
        self.send(SetupAction::NavigateNext).await.map(|_| ())
    }

    pub async fn navigate_back(&self) -> Result<(), CoreError> {
        self.send(SetupAction::NavigateBack).await.map(|_| ())
    }

    pub async fn exit_setup(&self) -> Result<(), CoreError> {
        self.send(SetupAction::ExitSetup).await.map(|_| ())
    }

    pub async fn grant_via_elevation_service(&self) -> Result<GrantResult, CoreError> {
        self.grant(SetupAction::GrantViaElevationService).await
    }

    pub async fn grant_via_superuser(&self) -> Result<GrantResult, CoreError> {
        self.grant(SetupAction::GrantViaSuperuser).await
    }

    pub async fn check_permission_and_complete(&self) -> Result<bool, CoreError> {
        match self.send(SetupAction::CheckPermissionAndComplete).await? {
            ActionReply::Permission(granted) => Ok(granted),
            _ => Ok(false),
        }
    }

    pub async fn dismiss_notice(&self) -> Result<(), CoreError> {
        self.send(SetupAction::DismissNotice).await.map(|_| ())
    }

    /// Observe the flow state.
    pub fn state(&self) -> watch::Receiver<SetupUiState> {
        self.state.clone()
    }

    async fn grant(&self, action: SetupAction) -> Result<GrantResult, CoreError> {
        match self.send(action).await? {
            ActionReply::Grant(result) => Ok(result),
            other => Err(CoreError::ValidationFailed {
                message: format!("unexpected reply to {action:?}: {other:?}"),
            }),
        }
    }
}

// ── SetupFlow ────────────────────────────────────────────────────────

pub struct SetupFlow<P: EnvironmentProbes, H: ElevationHost> {
    monitor: EnvironmentMonitor<P>,
    channel: Arc<ElevationChannel<H>>,
    completion: Arc<CompletionTransaction>,
    config: SetupConfig,
}

impl<P: EnvironmentProbes, H: ElevationHost> SetupFlow<P, H> {
    pub fn new(
        monitor: EnvironmentMonitor<P>,
        channel: Arc<ElevationChannel<H>>,
        preferences: Arc<dyn PreferenceStore>,
        monitoring: Arc<dyn MonitoringService>,
        config: SetupConfig,
    ) -> Self {
        Self {
            monitor,
            channel,
            completion: Arc::new(CompletionTransaction::new(preferences, monitoring)),
            config,
        }
    }

    pub fn completion(&self) -> &Arc<CompletionTransaction> {
        &self.completion
    }

    /// Start the flow on its own task.
    pub fn spawn(self) -> (SetupHandle, JoinHandle<SetupOutcome>) {
        let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_SIZE);
        let (state_tx, state_rx) =
            watch::channel(SetupUiState::new(host_instruction(&self.config.package_id)));
        let handle = SetupHandle {
            action_tx,
            state: state_rx,
        };
        let task = tokio::spawn(self.run(action_rx, state_tx));
        (handle, task)
    }

    async fn run(
        self,
        mut actions: mpsc::Receiver<ActionEnvelope>,
        state_tx: watch::Sender<SetupUiState>,
    ) -> SetupOutcome {
        let (countdown, mut countdown_rx) = Countdown::new(self.config.countdown_tick);
        let (grant_tx, mut grant_rx) = mpsc::channel::<GrantFinished>(GRANT_CHANNEL_SIZE);
        let mut authorizations = BroadcastStream::new(self.channel.authorization_outcomes());
        let mut snapshots = self.monitor.subscribe();

        // Initial snapshot decides whether steps can be skipped.
        self.monitor.start();
        let initial = self.monitor.refresh().await;
        snapshots.borrow_and_update();
        let (machine, effects) = SetupMachine::new(initial, self.config.auto_advance_ticks);

        let mut driver = Driver {
            machine,
            countdown,
            pending_command: host_instruction(&self.config.package_id),
            notice: None,
            outcome: None,
            state_tx,
            flow: &self,
        };
        info!(step = %driver.machine.step(), "setup flow started");
        driver.apply(effects);
        driver.publish();

        while driver.outcome.is_none() {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = *snapshots.borrow_and_update();
                    let effects = driver.machine.on_snapshot(snapshot);
                    driver.apply(effects);
                }
                Some(event) = countdown_rx.recv() => driver.on_countdown(event),
                Some(done) = grant_rx.recv() => {
                    driver.notice = Some(Notice::grant(done.result.clone()));
                    if done.result.is_success() {
                        let effects = driver.machine.on_grant_success();
                        driver.apply(effects);
                    }
                    if let Some(tx) = done.response_tx {
                        driver.publish();
                        let _ = tx.send(ActionReply::Grant(done.result));
                    }
                }
                Some(outcome) = authorizations.next() => match outcome {
                    Ok(AuthorizationOutcome::Granted) => {
                        info!("companion authorization granted, retrying grant");
                        driver.notice = Some(Notice::authorization(AuthorizationOutcome::Granted));
                        self.spawn_grant(GrantStrategy::ElevationService, grant_tx.clone(), None);
                    }
                    Ok(AuthorizationOutcome::Denied) => {
                        driver.notice = Some(Notice::authorization(AuthorizationOutcome::Denied));
                    }
                    Err(e) => debug!(error = %e, "authorization stream lagged"),
                },
                envelope = actions.recv() => {
                    let Some(envelope) = envelope else {
                        // Every handle dropped: nobody can finish the flow.
                        driver.apply(vec![Effect::Exit]);
                        break;
                    };
                    self.handle_action(&mut driver, envelope, &grant_tx).await;
                }
            }
            driver.publish();
        }

        let outcome = driver.outcome.unwrap_or(SetupOutcome::Exited);
        self.monitor.stop();
        driver.countdown.cancel();
        info!(%outcome, "setup flow finished");
        outcome
    }

    async fn handle_action(
        &self,
        driver: &mut Driver<'_, P, H>,
        envelope: ActionEnvelope,
        grant_tx: &mpsc::Sender<GrantFinished>,
    ) {
        let ActionEnvelope {
            action,
            response_tx,
        } = envelope;
        debug!(?action, "setup action");

        let reply = match action {
            SetupAction::NavigateNext => {
                let effects = driver.machine.next();
                driver.apply(effects);
                ActionReply::Done
            }
            SetupAction::NavigateBack => {
                let effects = driver.machine.back();
                driver.apply(effects);
                ActionReply::Done
            }
            SetupAction::ExitSetup => {
                driver.apply(vec![Effect::CancelCountdown, Effect::Exit]);
                ActionReply::Done
            }
            SetupAction::GrantViaElevationService => {
                self.spawn_grant(
                    GrantStrategy::ElevationService,
                    grant_tx.clone(),
                    Some(response_tx),
                );
                return;
            }
            SetupAction::GrantViaSuperuser => {
                self.spawn_grant(GrantStrategy::Superuser, grant_tx.clone(), Some(response_tx));
                return;
            }
            SetupAction::CheckPermissionAndComplete => {
                let snapshot = self.monitor.refresh().await;
                let effects = driver.machine.on_permission_check(snapshot);
                driver.apply(effects);
                ActionReply::Permission(snapshot.permission_granted)
            }
            SetupAction::DismissNotice => {
                driver.notice = None;
                ActionReply::Done
            }
        };
        // Callers observe the new state as soon as they get the reply.
        driver.publish();
        let _ = response_tx.send(reply);
    }

    fn spawn_grant(
        &self,
        strategy: GrantStrategy,
        grant_tx: mpsc::Sender<GrantFinished>,
        response_tx: Option<oneshot::Sender<ActionReply>>,
    ) {
        let channel = Arc::clone(&self.channel);
        let package_id = self.config.package_id.clone();
        tokio::spawn(async move {
            let result = match strategy {
                GrantStrategy::ElevationService => {
                    channel.via_elevation_service(&package_id).await
                }
                GrantStrategy::Superuser => channel.via_superuser(&package_id).await,
            };
            if let Err(e) = grant_tx.send(GrantFinished { result, response_tx }).await {
                warn!(result = ?e.0.result, "setup flow ended before the grant finished");
            }
        });
    }
}

// ── Driver state ─────────────────────────────────────────────────────

struct Driver<'a, P: EnvironmentProbes, H: ElevationHost> {
    machine: SetupMachine,
    countdown: Countdown,
    pending_command: String,
    notice: Option<Notice>,
    outcome: Option<SetupOutcome>,
    state_tx: watch::Sender<SetupUiState>,
    flow: &'a SetupFlow<P, H>,
}

impl<P: EnvironmentProbes, H: ElevationHost> Driver<'_, P, H> {
    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartCountdown(ticks) => {
                    debug!(ticks, step = %self.machine.step(), "auto-advance countdown started");
                    self.countdown.start(ticks);
                }
                Effect::CancelCountdown => self.countdown.cancel(),
                Effect::Complete => self.complete(),
                Effect::Exit => {
                    if self.outcome.is_none() {
                        self.countdown.cancel();
                        self.flow.monitor.stop();
                        self.outcome = Some(SetupOutcome::Exited);
                    }
                }
            }
        }
    }

    fn complete(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        self.countdown.cancel();
        self.machine.mark_completed();
        if !self.flow.completion.run() {
            debug!("completion already handled");
        }
        self.flow.monitor.stop();
        self.outcome = Some(SetupOutcome::Completed);
    }

    fn on_countdown(&mut self, event: CountdownEvent) {
        if !self.countdown.is_current(&event) {
            return;
        }
        if event.elapsed() {
            self.countdown.finish();
            let effects = self.machine.on_countdown_elapsed();
            self.apply(effects);
        } else {
            self.machine.on_countdown_tick(event.remaining);
        }
    }

    fn publish(&self) {
        let machine = &self.machine;
        self.state_tx.send_replace(SetupUiState {
            current_step: machine.step(),
            pending_command: self.pending_command.clone(),
            snapshot: machine.latest(),
            completed_steps: machine.completed_steps(),
            countdown: machine.countdown(),
            is_completed: machine.is_completed(),
            notice: self.notice.clone(),
        });
    }
}

// ── Tests ────────────────────────────────────────────────────────────
