//! Sensor fusion for anchorwatch
//!
//! Turns angle snapshots from two fixed direction-finding anchors into the
//! emitter's speed along the baseline between them and a discrete risk level.
//!
//! # Example
//!
//! ```
//! use anchorwatch_fusion::{
//!     classify, AngleEntry, AngleSnapshot, AnnotatedSample, Baseline, BaselinePair,
//!     MotionEstimator, PositionTag,
//! };
//! use chrono::Utc;
//!
//! let snapshot = AngleSnapshot::new(vec![
//!     AngleEntry { theta: 90.0, val: 50, pos: PositionTag::Label("left".into()) },
//!     AngleEntry { theta: -90.0, val: 10, pos: PositionTag::Label("right".into()) },
//! ]);
//!
//! let pair = BaselinePair::new(0, 1).unwrap();
//! let mut motion = MotionEstimator::new(Baseline::new(pair, 0.5).unwrap());
//!
//! let now = Utc::now();
//! let speed = motion.update(&snapshot, now).unwrap();
//! let (left, right) = pair.angles(&snapshot).unwrap();
//! let risk = classify(speed, left, right).unwrap();
//!
//! let sample = AnnotatedSample::annotate(&snapshot, speed, risk, now);
//! assert_eq!(sample.len(), 2);
//! ```

pub mod error;
pub mod models;
pub mod motion;
pub mod risk;

// Re-exports
pub use error::{FusionError, Result};
pub use models::{
    AngleEntry, AngleSnapshot, AnnotatedEntry, AnnotatedSample, BaselinePair, PositionTag,
    RiskLevel,
};
pub use motion::{speed_along_baseline, Baseline, MotionEstimator, MotionState};
pub use risk::{classify, position_risk, speed_risk};
