//! Restart policy for unrecoverable pipeline faults
//!
//! The broadcast hub outlives restarts; only the anchors and the motion state
//! are rebuilt.

use std::sync::Arc;
use std::time::Duration;

use anchorwatch_acquisition::{Acquisition, AcquisitionError};
use anchorwatch_broadcaster::BroadcastHub;
use anchorwatch_fusion::Baseline;
use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::PipelineSettings;
use crate::pipeline::Pipeline;

/// Opens a fresh set of anchors; called on start and after every fault
pub type AnchorOpener = Arc<dyn Fn() -> std::result::Result<Acquisition, AcquisitionError> + Send + Sync>;

pub struct Supervisor {
    open: AnchorOpener,
    baseline: Baseline,
    hub: Arc<BroadcastHub>,
    settings: PipelineSettings,
    close_deadline: Duration,
    restarts: u32,
}

impl Supervisor {
    pub fn new(
        open: AnchorOpener,
        baseline: Baseline,
        hub: Arc<BroadcastHub>,
        settings: PipelineSettings,
        close_deadline: Duration,
    ) -> Self {
        Self {
            open,
            baseline,
            hub,
            settings,
            close_deadline,
            restarts: 0,
        }
    }

    /// Restarts performed so far
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    async fn open_anchors(&self) -> std::result::Result<Acquisition, AcquisitionError> {
        let open = Arc::clone(&self.open);
        tokio::task::spawn_blocking(move || open())
            .await
            .map_err(|e| AcquisitionError::WorkerPanicked {
                id: "opener".to_string(),
                reason: e.to_string(),
            })?
    }

    /// Run pipelines until shutdown; gives up after `max_restarts` failed runs in a row
    ///
    /// Failing to open the anchors the very first time is returned at once.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut consecutive = 0u32;
        let mut first = true;

        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let fault = match self.open_anchors().await {
                Ok(acquisition) => {
                    info!("Pipeline running with {} anchors", acquisition.len());
                    let mut pipeline = Pipeline::new(
                        acquisition,
                        self.baseline,
                        Arc::clone(&self.hub),
                        self.settings.idle_interval(),
                        self.settings.progress_every,
                    );

                    let result = pipeline.run(shutdown.clone()).await;
                    let published = pipeline.published();
                    pipeline.close(self.close_deadline).await;

                    match result {
                        Ok(()) => return Ok(()),
                        Err(e) => {
                            if published > 0 {
                                consecutive = 0;
                            }
                            anyhow::Error::from(e)
                        }
                    }
                }
                Err(e) if first => {
                    return Err(anyhow::Error::from(e).context("Failed to open anchors"));
                }
                Err(e) => anyhow::Error::from(e).context("Failed to reopen anchors"),
            };
            first = false;

            consecutive += 1;
            if consecutive > self.settings.max_restarts {
                error!("Pipeline failed {} times in a row, giving up", consecutive);
                return Err(fault.context(format!(
                    "Pipeline failed after {} restarts",
                    self.settings.max_restarts
                )));
            }

            self.restarts += 1;
            warn!(
                "Pipeline fault: {:#}. Restarting in {:?} (attempt {}/{})",
                fault,
                self.settings.restart_delay(),
                consecutive,
                self.settings.max_restarts
            );

            tokio::select! {
                _ = tokio::time::sleep(self.settings.restart_delay()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
