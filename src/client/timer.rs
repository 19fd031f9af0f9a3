// src/client/timer.rs

//! Module countdown.

use std::{future::Future, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::Instant};

use crate::exam::ModuleId;

/// Runs `on_expire` once when a module's time is up, unless stopped first.
#[derive(Debug)]
pub struct Countdown {
    module: ModuleId,
    deadline: Instant,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Countdown {
    pub fn start<F, Fut>(module: ModuleId, duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce(ModuleId) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let deadline = Instant::now() + duration;
        let (stop, mut stopped) = watch::channel(false);

        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::info!(module = %module, "Module time is up");
                    on_expire(module).await;
                }
                _ = async {
                    // a dropped sender means the countdown was dropped
                    while stopped.changed().await.is_ok() {
                        if *stopped.borrow() {
                            break;
                        }
                    }
                } => {}
            }
        });

        Self {
            module,
            deadline,
            stop,
            task,
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the countdown. Does nothing once it has fired.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}
