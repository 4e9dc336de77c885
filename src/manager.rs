use std::time::Duration;

use log::{debug, info};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::hardware::Hardware;
use crate::messages::{InputEvent, ScanRecord};
use crate::scheduler::Scheduler;

/// Single event loop that owns the scheduler. Phase deadlines, scan records
/// and button presses are handled one at a time in arrival order.
pub struct Manager<H: Hardware> {
    scheduler: Scheduler<H>,
    records: mpsc::Receiver<ScanRecord>,
    input: broadcast::Receiver<InputEvent>,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn deadline_after(duration: Option<Duration>) -> Option<Instant> {
    duration.map(|duration| Instant::now() + duration)
}

impl<H: Hardware> Manager<H> {
    pub fn new(
        scheduler: Scheduler<H>,
        records: mpsc::Receiver<ScanRecord>,
        input: broadcast::Receiver<InputEvent>,
    ) -> Self {
        Manager {
            scheduler,
            records,
            input,
        }
    }

    pub async fn run_loop(mut self) -> anyhow::Result<()> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        let mut deadline = deadline_after(self.scheduler.start());
        let mut input_open = true;

        loop {
            tokio::select! {
                _ = wait_until(deadline) => {
                    deadline = deadline_after(self.scheduler.phase_elapsed());
                    debug!(
                        "Now {:?} (cyclic count {})",
                        self.scheduler.phase(),
                        self.scheduler.cyclic_count()
                    );
                }
                Some(record) = self.records.recv() => {
                    self.scheduler.handle_record(&record);
                }
                event = self.input.recv(), if input_open => {
                    match event {
                        Ok(InputEvent::ButtonPressed) => {
                            if let Some(duration) = self.scheduler.toggle_sleep_wake() {
                                deadline = deadline_after(Some(duration));
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            debug!("Input receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Input receiver closed");
                            input_open = false;
                        }
                    }
                }
                result = &mut shutdown => {
                    result?;
                    info!("Shutting down");
                    break;
                }
            }
        }

        info!("Exiting manager event loop");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_until_elapsed_deadline() {
        wait_until(Some(Instant::now())).await;
        assert!(deadline_after(None).is_none());
        assert!(deadline_after(Some(Duration::from_secs(1))).is_some_and(|d| d > Instant::now()));
    }
}
