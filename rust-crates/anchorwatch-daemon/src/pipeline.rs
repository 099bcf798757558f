//! Acquisition → motion → risk → broadcast main loop

use std::sync::Arc;
use std::time::Duration;

use anchorwatch_acquisition::{Acquisition, Poll};
use anchorwatch_broadcaster::{BroadcastHub, PublishReport};
use anchorwatch_fusion::{classify, AnnotatedSample, Baseline, MotionEstimator};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::fault::CycleError;

const SPINNER: [char; 4] = ['/', '|', '\\', '-'];

/// Source of cycle timestamps
pub type Clock = Box<dyn FnMut() -> DateTime<Utc> + Send>;

/// What one iteration did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No anchor reported anything new
    Unchanged,
    /// Some anchors have not reported since startup
    Incomplete { awaiting: Vec<String> },
    Published {
        sample: AnnotatedSample,
        report: PublishReport,
    },
}

/// Pipeline state
pub struct Pipeline {
    acquisition: Acquisition,
    motion: MotionEstimator,
    hub: Arc<BroadcastHub>,
    clock: Clock,
    idle_interval: Duration,
    progress_every: u64,
    published: u64,
}

impl Pipeline {
    pub fn new(
        acquisition: Acquisition,
        baseline: Baseline,
        hub: Arc<BroadcastHub>,
        idle_interval: Duration,
        progress_every: u64,
    ) -> Self {
        Self {
            acquisition,
            motion: MotionEstimator::new(baseline),
            hub,
            clock: Box::new(Utc::now),
            idle_interval,
            progress_every: progress_every.max(1),
            published: 0,
        }
    }

    /// Replace the wall clock, e.g. with a deterministic one in tests
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Number of samples published by this pipeline
    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn motion(&self) -> &MotionEstimator {
        &self.motion
    }

    /// poll → (unchanged? skip : estimate → classify → annotate → publish)
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let snapshot = match self.acquisition.poll().await? {
            Poll::Unchanged => return Ok(CycleOutcome::Unchanged),
            Poll::Incomplete { awaiting } => {
                debug!("Waiting for first reading from {:?}", awaiting);
                return Ok(CycleOutcome::Incomplete { awaiting });
            }
            Poll::Ready(snapshot) => snapshot,
        };

        let now = (self.clock)();
        let speed = self.motion.update(&snapshot, now)?;
        let (angle0, angle1) = self.motion.baseline().pair.angles(&snapshot)?;
        let risk = classify(speed, angle0, angle1)?;

        let sample = AnnotatedSample::annotate(&snapshot, speed, risk, now);
        let report = self.hub.publish(&sample).await?;
        self.published += 1;

        debug!(
            "Sending to {} clients[{}]{} val0:{} val1:{} speed:{:.3} risk:{}",
            report.delivered,
            self.published,
            SPINNER[(self.published % SPINNER.len() as u64) as usize],
            angle0,
            angle1,
            speed,
            risk
        );
        if self.published % self.progress_every == 0 {
            info!(
                "Published {} samples ({} clients, {} dropped this cycle)",
                self.published, report.delivered, report.dropped
            );
        }

        Ok(CycleOutcome::Published { sample, report })
    }

    /// Run cycles until `shutdown` flips to true or an unrecoverable fault occurs
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CycleError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let published = match self.run_cycle().await {
                Ok(CycleOutcome::Published { .. }) => true,
                Ok(_) => false,
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping cycle: {}", e);
                    false
                }
                Err(e) => return Err(e),
            };

            if !published {
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_interval) => {}
                    changed = shutdown.changed() => {
                        // Sender dropped: treat as shutdown
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Close the anchor channels, waiting at most `deadline`
    pub async fn close(self, deadline: Duration) {
        self.acquisition.close(deadline).await;
    }
}
