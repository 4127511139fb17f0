// Background drain loop
// Periodically drains the delivery queue until shut down

use crate::queue::DeliveryQueue;
use crate::scrobbler::LastFmClient;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to the running drain thread. Dropping it also stops the loop,
/// without waiting for it.
pub struct DrainScheduler {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl DrainScheduler {
    /// Start draining `queue` every `interval`
    pub fn spawn(
        queue: Arc<DeliveryQueue>,
        client: Arc<LastFmClient>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("scrobble-drain".to_string())
            .spawn(move || {
                log::debug!("Drain scheduler started (interval {:?})", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let report = queue.drain(&client);
                            if report.attempted > 0 {
                                log::debug!(
                                    "Drain cycle: {} delivered, {} failed, {} remaining",
                                    report.delivered,
                                    report.failed,
                                    report.remaining
                                );
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("Drain scheduler stopped");
            })?;

        Ok(Self { stop, handle })
    }

    /// Stop the loop and wait for it. An in-flight drain finishes first.
    pub fn shutdown(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            log::error!("Drain scheduler thread panicked");
        }
    }
}
