//! Emitter velocity along the receiver baseline
//!
//! The estimator keeps exactly one previous snapshot and its timestamp. Each
//! call compares the baseline angles of the new snapshot with the previous
//! ones and projects the angular change onto the baseline:
//!
//! ```text
//! displacement = |distance × (Δθ_left − Δθ_right) / 2|
//! speed        = displacement / elapsed     (0 when elapsed ≤ 0)
//! ```

use chrono::{DateTime, Utc};

use crate::error::{FusionError, Result};
use crate::models::{AngleSnapshot, BaselinePair};

/// Fixed geometry of the two receivers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub pair: BaselinePair,
    /// Distance between the receivers in meters
    pub distance_m: f64,
}

impl Baseline {
    pub fn new(pair: BaselinePair, distance_m: f64) -> Result<Self> {
        if !distance_m.is_finite() || distance_m <= 0.0 {
            return Err(FusionError::InvalidBaseline(format!(
                "distance must be positive, got {}",
                distance_m
            )));
        }
        Ok(Self { pair, distance_m })
    }
}

/// Previous sample carried across cycles
#[derive(Debug, Clone, Default)]
pub struct MotionState {
    previous: Option<AngleSnapshot>,
    previous_at: Option<DateTime<Utc>>,
}

impl MotionState {
    pub fn previous(&self) -> Option<&AngleSnapshot> {
        self.previous.as_ref()
    }

    pub fn previous_at(&self) -> Option<DateTime<Utc>> {
        self.previous_at
    }
}

/// Stateful estimator of the emitter's speed along the baseline
#[derive(Debug, Clone)]
pub struct MotionEstimator {
    baseline: Baseline,
    state: MotionState,
}

impl MotionEstimator {
    pub fn new(baseline: Baseline) -> Self {
        Self {
            baseline,
            state: MotionState::default(),
        }
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    /// Forget the previous sample; the next update yields speed 0
    pub fn reset(&mut self) {
        self.state = MotionState::default();
    }

    /// Consume `current` taken at `now` and return the speed in m/s
    ///
    /// The first call after construction or [`reset`](Self::reset) only seeds
    /// the state and returns 0. State is not touched when the snapshot lacks a
    /// baseline entry.
    pub fn update(&mut self, current: &AngleSnapshot, now: DateTime<Utc>) -> Result<f64> {
        let current_angles = self.baseline.pair.angles(current)?;

        let speed = match (&self.state.previous, self.state.previous_at) {
            (Some(previous), Some(previous_at)) => {
                let previous_angles = self.baseline.pair.angles(previous)?;
                speed_along_baseline(
                    self.baseline.distance_m,
                    previous_angles,
                    current_angles,
                    elapsed_seconds(previous_at, now),
                )
            }
            _ => 0.0,
        };

        self.state.previous = Some(current.clone());
        self.state.previous_at = Some(now);

        Ok(speed)
    }
}

/// Speed along the baseline from two `(left, right)` angle pairs in degrees
pub fn speed_along_baseline(
    distance_m: f64,
    previous: (i32, i32),
    current: (i32, i32),
    elapsed_s: f64,
) -> f64 {
    if elapsed_s.is_nan() || elapsed_s <= 0.0 {
        return 0.0;
    }

    // Subtract in f64: parsed angles span the full i32 range
    let delta_left = (f64::from(current.0) - f64::from(previous.0)).to_radians();
    let delta_right = (f64::from(current.1) - f64::from(previous.1)).to_radians();
    let displacement = (distance_m * (delta_left - delta_right) / 2.0).abs();

    displacement / elapsed_s
}

fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .num_microseconds()
        .map(|us| us as f64 / 1_000_000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AngleEntry, PositionTag};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn snapshot(left: i32, right: i32) -> AngleSnapshot {
        AngleSnapshot::new(vec![
            AngleEntry {
                theta: 0.0,
                val: left,
                pos: PositionTag::Index(0),
            },
            AngleEntry {
                theta: 0.0,
                val: right,
                pos: PositionTag::Index(1),
            },
        ])
    }

    fn estimator(distance_m: f64) -> MotionEstimator {
        let pair = BaselinePair::new(0, 1).unwrap();
        MotionEstimator::new(Baseline::new(pair, distance_m).unwrap())
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_first_update_seeds_state() {
        let mut motion = estimator(0.5);
        let speed = motion.update(&snapshot(40, 10), t0()).unwrap();
        assert_eq!(speed, 0.0);
        assert_eq!(motion.state().previous(), Some(&snapshot(40, 10)));
        assert_eq!(motion.state().previous_at(), Some(t0()));
    }

    #[test]
    fn test_speed_for_ten_degree_step() {
        let mut motion = estimator(0.5);
        motion.update(&snapshot(10, 10), t0()).unwrap();
        let speed = motion
            .update(&snapshot(20, 10), t0() + Duration::seconds(1))
            .unwrap();

        // |0.5 * radians(10) / 2| / 1
        assert_relative_eq!(speed, 0.043_633_231_299_858_24, epsilon = 1e-15);
    }

    #[test]
    fn test_opposite_changes_add_up() {
        let speed = speed_along_baseline(1.0, (0, 0), (10, -10), 2.0);
        assert_relative_eq!(speed, 20f64.to_radians() / 2.0 / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_extreme_angles_do_not_overflow() {
        let speed = speed_along_baseline(0.5, (i32::MAX, 0), (-i32::MAX, 0), 1.0);
        let expected = 0.5 * (2.0 * f64::from(i32::MAX)).to_radians() / 2.0;
        assert_relative_eq!(speed, expected, max_relative = 1e-12);

        let mut motion = estimator(0.5);
        motion.update(&snapshot(i32::MAX, i32::MIN), t0()).unwrap();
        let speed = motion
            .update(&snapshot(i32::MIN, i32::MAX), t0() + Duration::seconds(1))
            .unwrap();
        assert!(speed.is_finite() && speed > 0.0);
    }

    #[test]
    fn test_parallel_changes_cancel() {
        assert_eq!(speed_along_baseline(0.5, (10, 10), (30, 30), 1.0), 0.0);
    }

    #[test]
    fn test_non_positive_elapsed_is_zero() {
        let mut motion = estimator(0.5);
        motion.update(&snapshot(10, 10), t0()).unwrap();
        assert_eq!(motion.update(&snapshot(50, 10), t0()).unwrap(), 0.0);
        assert_eq!(
            motion
                .update(&snapshot(80, 10), t0() - Duration::seconds(3))
                .unwrap(),
            0.0
        );
        assert_eq!(speed_along_baseline(0.5, (0, 0), (10, 0), f64::NAN), 0.0);
    }

    #[test]
    fn test_reset_forgets_previous() {
        let mut motion = estimator(0.5);
        motion.update(&snapshot(10, 10), t0()).unwrap();
        motion.reset();
        let speed = motion
            .update(&snapshot(60, 10), t0() + Duration::seconds(1))
            .unwrap();
        assert_eq!(speed, 0.0);
    }

    #[test]
    fn test_baseline_uses_configured_pair() {
        let pair = BaselinePair::new(1, 0).unwrap();
        let mut motion = MotionEstimator::new(Baseline::new(pair, 0.5).unwrap());
        motion.update(&snapshot(10, 10), t0()).unwrap();
        let speed = motion
            .update(&snapshot(10, 20), t0() + Duration::seconds(1))
            .unwrap();
        assert_relative_eq!(speed, 0.5 * 10f64.to_radians() / 2.0, epsilon = 1e-15);
    }

    #[test]
    fn test_missing_entry_leaves_state_untouched() {
        let pair = BaselinePair::new(0, 2).unwrap();
        let mut motion = MotionEstimator::new(Baseline::new(pair, 0.5).unwrap());
        assert!(motion.update(&snapshot(10, 10), t0()).is_err());
        assert!(motion.state().previous().is_none());
    }

    #[test]
    fn test_baseline_rejects_bad_distance() {
        let pair = BaselinePair::new(0, 1).unwrap();
        assert!(Baseline::new(pair, 0.0).is_err());
        assert!(Baseline::new(pair, -1.0).is_err());
        assert!(Baseline::new(pair, f64::NAN).is_err());
    }
}
