//! Resettable one-shot timer backed by a Tokio task.
//!
//! The callback runs on the timer task and must not block: owners hand it a
//! closure that spawns the real work, holding only a `Weak` reference to
//! themselves. Dropping the [`Timer`] ends the task.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
enum TimerCommand {
    Idle,
    Armed(Instant),
}

/// One-shot timer that can be re-armed or cancelled at any time
#[derive(Debug)]
pub(crate) struct Timer {
    commands: watch::Sender<TimerCommand>,
}

impl Timer {
    /// Start the timer task in the idle state
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub(crate) fn new<F>(name: &'static str, on_elapsed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (commands, mut rx) = watch::channel(TimerCommand::Idle);

        tokio::spawn(async move {
            loop {
                let command = *rx.borrow_and_update();
                match command {
                    TimerCommand::Idle => {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                    TimerCommand::Armed(deadline) => {
                        tokio::select! {
                            () = tokio::time::sleep_until(deadline) => {
                                tracing::trace!("{} timer elapsed", name);
                                on_elapsed();
                                if rx.changed().await.is_err() {
                                    break;
                                }
                            }
                            changed = rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            tracing::trace!("{} timer stopped", name);
        });

        Self { commands }
    }

    /// Fire once after `after`, replacing any pending deadline
    pub(crate) fn set(&self, after: Duration) {
        let command = match Instant::now().checked_add(after) {
            Some(deadline) => TimerCommand::Armed(deadline),
            None => TimerCommand::Idle,
        };
        self.commands.send_replace(command);
    }

    /// Cancel the pending deadline, if any
    pub(crate) fn cancel(&self) {
        self.commands.send_replace(TimerCommand::Idle);
    }
}
