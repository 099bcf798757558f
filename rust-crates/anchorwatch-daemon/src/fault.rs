//! Fault classification for one main-loop iteration

use anchorwatch_acquisition::AcquisitionError;
use anchorwatch_broadcaster::BroadcasterError;
use anchorwatch_fusion::FusionError;
use thiserror::Error;

/// Everything that can go wrong between polling and publishing
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Acquisition fault: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Fusion fault: {0}")]
    Fusion(#[from] FusionError),

    #[error("Broadcast fault: {0}")]
    Broadcast(#[from] BroadcasterError),
}

impl CycleError {
    /// Recoverable faults skip one cycle; the rest end the pipeline run
    pub fn is_recoverable(&self) -> bool {
        match self {
            CycleError::Acquisition(e) => e.is_transient(),
            CycleError::Fusion(FusionError::UnclassifiedPosition { .. }) => true,
            CycleError::Fusion(_) => false,
            CycleError::Broadcast(BroadcasterError::Serialization(_)) => true,
            CycleError::Broadcast(_) => false,
        }
    }
}
