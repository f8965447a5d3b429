use crate::allocator::CodeAllocator;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tinylink_core::{CodePool, ReplenishOutcome};
use tinylink_generator::Generator;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ReplenisherSettings {
    /// How often the pool size is checked against the low watermark.
    #[builder(default = Duration::from_secs(30))]
    pub interval: Duration,
}

impl Default for ReplenisherSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Background task keeping the code pool above its low watermark.
///
/// It replenishes once right after start-up, then checks the pool every
/// `interval` and refills it when it has dropped below the watermark.
/// [`notify`](Replenisher::notify) wakes it early, e.g. after an allocation
/// found the pool empty.
pub struct Replenisher {
    wake: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Replenisher {
    /// Spawns the replenish loop on the current tokio runtime.
    pub fn spawn<P, G>(allocator: Arc<CodeAllocator<P, G>>, settings: ReplenisherSettings) -> Self
    where
        P: CodePool,
        G: Generator,
    {
        let wake = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run(allocator, settings, Arc::clone(&wake), shutdown_rx));

        Self {
            wake,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Requests an immediate replenish, regardless of the watermark.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Stops the loop and waits for an in-flight replenish to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "replenisher task failed");
            }
        }
    }
}

async fn run<P, G>(
    allocator: Arc<CodeAllocator<P, G>>,
    settings: ReplenisherSettings,
    wake: Arc<Notify>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    P: CodePool,
    G: Generator,
{
    info!(interval = ?settings.interval, "replenisher started");
    replenish(&allocator).await;

    let mut interval = time::interval(settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and the start-up run already happened.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match allocator.below_low_watermark().await {
                    Ok(true) => replenish(&allocator).await,
                    Ok(false) => debug!("code pool above low watermark"),
                    Err(e) => warn!(error = %e, "failed to read code pool size"),
                }
            }
            _ = wake.notified() => {
                debug!("replenish requested");
                replenish(&allocator).await;
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("replenisher stopped");
}

async fn replenish<P, G>(allocator: &CodeAllocator<P, G>)
where
    P: CodePool,
    G: Generator,
{
    match allocator.replenish().await {
        Ok(ReplenishOutcome::Interrupted { .. }) | Ok(ReplenishOutcome::Completed { .. }) => {}
        Ok(ReplenishOutcome::AlreadyRunning) => debug!("another replenisher is running"),
        Err(e) => warn!(error = %e, "failed to acquire replenish lock"),
    }
}
