//! Poll → decide → write loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::processor::WriteOutcome;
use crate::queue::QueueError;
use crate::service::Components;

use super::shutdown_signalled;

pub struct InferenceWorker {
    id: i32,
    components: Arc<Components>,
    shutdown: watch::Receiver<bool>,
}

impl InferenceWorker {
    pub(crate) fn new(id: i32, components: Arc<Components>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            id,
            components,
            shutdown,
        }
    }

    /// Main worker loop. Returns once shutdown is signalled.
    pub async fn run(mut self) {
        info!(target: "mob_ai::worker", worker_id = self.id, "inference worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let pause = match self.run_once().await {
                // Queue may be deeper than one batch; poll again right away.
                Ok(n) if n > 0 => continue,
                Ok(_) => self.components.config.poll_interval,
                Err(e) => {
                    self.components.counters.record_loop_error();
                    error!(target: "mob_ai::worker", worker_id = self.id, error = %e, "worker iteration failed");
                    self.components.config.error_backoff
                }
            };
            if !self.pause(pause).await {
                break;
            }
        }

        info!(target: "mob_ai::worker", worker_id = self.id, "inference worker stopped");
    }

    /// One cycle. Returns the number of requests handled.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let requests = self.components.processor.poll(self.id).await;
        if requests.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        let responses = self.components.pipeline.process(&requests).await;
        let outcome = self.components.processor.write_responses(&responses).await?;
        let elapsed = started.elapsed();

        self.components.counters.record_batch(requests.len(), elapsed);
        match outcome {
            WriteOutcome::Written(n) => debug!(
                target: "mob_ai::worker",
                worker_id = self.id,
                written = n,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "batch completed"
            ),
            WriteOutcome::MarkedFailed(n) => error!(
                target: "mob_ai::worker",
                worker_id = self.id,
                failed = n,
                "batch responses could not be written"
            ),
        }
        Ok(requests.len())
    }

    /// Sleeps for `duration` unless shutdown arrives first. Returns whether
    /// the loop should keep running.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown_signalled(&mut self.shutdown) => false,
        }
    }
}
