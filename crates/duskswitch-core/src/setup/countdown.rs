// ── Auto-advance countdown ──
//
// At most one countdown runs at a time. Starting a new one aborts the
// previous task and bumps the generation, so events already queued by the
// old task are recognised as stale and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const EVENT_CHANNEL_SIZE: usize = 16;

/// Progress report from a countdown task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownEvent {
    pub generation: u64,
    /// Ticks left. `0` means the countdown elapsed.
    pub remaining: u32,
}

impl CountdownEvent {
    pub fn elapsed(&self) -> bool {
        self.remaining == 0
    }
}

pub struct Countdown {
    tick: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
    tx: mpsc::Sender<CountdownEvent>,
}

impl Countdown {
    pub fn new(tick: Duration) -> (Self, mpsc::Receiver<CountdownEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        (
            Self {
                tick,
                generation: 0,
                task: None,
                tx,
            },
            rx,
        )
    }

    /// Start counting down from `ticks`, replacing any pending countdown.
    /// Returns the generation of the new countdown.
    pub fn start(&mut self, ticks: u32) -> u64 {
        self.cancel();
        let generation = self.generation;
        let tick = self.tick;
        let tx = self.tx.clone();

        self.task = Some(tokio::spawn(async move {
            for remaining in (1..=ticks).rev() {
                if tx.send(CountdownEvent { generation, remaining }).await.is_err() {
                    return;
                }
                tokio::time::sleep(tick).await;
            }
            let _ = tx
                .send(CountdownEvent {
                    generation,
                    remaining: 0,
                })
                .await;
        }));
        generation
    }

    /// Abort the pending countdown, if any. Its queued events become stale.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
    }

    /// Whether `event` belongs to the live countdown.
    pub fn is_current(&self, event: &CountdownEvent) -> bool {
        self.task.is_some() && event.generation == self.generation
    }

    /// Mark the live countdown as finished once its final event was handled.
    pub fn finish(&mut self) {
        self.task = None;
    }

    pub fn is_pending(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counts_down_to_zero() {
        let (mut countdown, mut rx) = Countdown::new(Duration::from_secs(1));
        let generation = countdown.start(2);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            assert!(countdown.is_current(&event));
            seen.push(event.remaining);
            if event.elapsed() {
                break;
            }
        }
        assert_eq!(seen, vec![2, 1, 0]);
        assert_eq!(generation, countdown.generation);
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_the_pending_countdown() {
        let (mut countdown, mut rx) = Countdown::new(Duration::from_secs(1));
        let first = countdown.start(2);
        // Let the first task queue its opening event.
        tokio::task::yield_now().await;
        let second = countdown.start(2);
        assert_ne!(first, second);

        let mut elapsed_current = 0;
        let mut elapsed_stale = 0;
        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(event) = rx.try_recv() {
            if event.elapsed() {
                if countdown.is_current(&event) {
                    elapsed_current += 1;
                } else {
                    elapsed_stale += 1;
                }
            }
        }
        assert_eq!(elapsed_current, 1);
        assert_eq!(elapsed_stale, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_silences_the_countdown() {
        let (mut countdown, mut rx) = Countdown::new(Duration::from_secs(1));
        countdown.start(2);
        countdown.cancel();
        assert!(!countdown.is_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(!countdown.is_current(&event));
        }
    }
}
