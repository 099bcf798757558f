//! Risk classification from baseline geometry and approach speed
//!
//! Position tiers (angles in degrees, left = θ₀, right = θ₁):
//!
//! | Tier   | Condition |
//! |--------|-----------|
//! | Low    | (45<θ₀<67 ∧ 0≤θ₁<22) ∨ (22<θ₀<45 ∧ θ₁<45) ∨ (θ₀<22 ∧ θ₁<45) |
//! | Medium | θ₀>67 ∨ (45<θ₀<67 ∧ 22<θ₁<67) |
//! | High   | (45<θ₀<67 ∧ θ₁>67) ∨ (22<θ₀<45 ∧ θ₁>45) ∨ (θ₀<22 ∧ θ₁>45) |
//!
//! The boundaries themselves (θ₀ ∈ {22, 45, 67}, some θ₁ edges, negative θ₁
//! in the 45..67 band) belong to no tier and are reported as
//! [`FusionError::UnclassifiedPosition`].

use crate::error::{FusionError, Result};
use crate::models::RiskLevel;

/// Position tier for the `(left, right)` angle pair
pub fn position_risk(angle0: i32, angle1: i32) -> Result<RiskLevel> {
    let mid_band = angle0 > 45 && angle0 < 67;
    let near_band = angle0 > 22 && angle0 < 45;
    let low_band = angle0 < 22;

    if (mid_band && (0..22).contains(&angle1))
        || (near_band && angle1 < 45)
        || (low_band && angle1 < 45)
    {
        Ok(RiskLevel::Low)
    } else if angle0 > 67 || (mid_band && angle1 > 22 && angle1 < 67) {
        Ok(RiskLevel::Medium)
    } else if (mid_band && angle1 > 67) || (near_band && angle1 > 45) || (low_band && angle1 > 45) {
        Ok(RiskLevel::High)
    } else {
        Err(FusionError::UnclassifiedPosition { angle0, angle1 })
    }
}

/// Speed tier: stationary or receding is low, below 1 m/s medium, otherwise high
pub fn speed_risk(speed: f64) -> RiskLevel {
    if speed >= 1.0 {
        RiskLevel::High
    } else if speed > 0.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Combined risk: the higher of the position and speed tiers
///
/// A high speed tier decides the result on its own, so an angle pair outside
/// the position table only fails classification when speed is below 1 m/s.
pub fn classify(speed: f64, angle0: i32, angle1: i32) -> Result<RiskLevel> {
    let speed_tier = speed_risk(speed);
    if speed_tier == RiskLevel::High {
        return Ok(RiskLevel::High);
    }

    let position_tier = position_risk(angle0, angle1)?;
    Ok(position_tier.max(speed_tier))
}
