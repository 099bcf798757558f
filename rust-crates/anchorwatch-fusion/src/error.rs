use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("Angle pair ({angle0}°, {angle1}°) is outside the position risk table")]
    UnclassifiedPosition { angle0: i32, angle1: i32 },

    #[error("Baseline entry {index} missing from snapshot of {len} entries")]
    MissingBaselineEntry { index: usize, len: usize },

    #[error("Invalid baseline: {0}")]
    InvalidBaseline(String),

    #[error("Invalid risk level: {0}")]
    InvalidRiskLevel(u8),
}

pub type Result<T> = std::result::Result<T, FusionError>;
