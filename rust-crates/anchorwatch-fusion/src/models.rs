//! Data models shared by acquisition, fusion and broadcast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{FusionError, Result};

/// Relative position tag of an anchor, passed through to clients untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PositionTag {
    Index(i64),
    Label(String),
}

impl std::fmt::Display for PositionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionTag::Index(i) => write!(f, "{}", i),
            PositionTag::Label(s) => write!(f, "{}", s),
        }
    }
}

/// One anchor's reading inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleEntry {
    /// Baseline offset angle of the anchor
    pub theta: f64,
    /// Current angle in degrees (negated raw azimuth)
    pub val: i32,
    /// Position tag from configuration
    pub pos: PositionTag,
}

/// Time-coherent set of angle readings, index-aligned with configuration order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AngleSnapshot {
    entries: Vec<AngleEntry>,
}

impl AngleSnapshot {
    pub fn new(entries: Vec<AngleEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[AngleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Angle value of the entry at `index`
    pub fn angle(&self, index: usize) -> Result<i32> {
        self.entries
            .get(index)
            .map(|e| e.val)
            .ok_or(FusionError::MissingBaselineEntry {
                index,
                len: self.entries.len(),
            })
    }
}

/// The two anchors forming the baseline, as indices into the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselinePair {
    pub left: usize,
    pub right: usize,
}

impl BaselinePair {
    pub fn new(left: usize, right: usize) -> Result<Self> {
        if left == right {
            return Err(FusionError::InvalidBaseline(format!(
                "left and right anchors are both index {}",
                left
            )));
        }
        Ok(Self { left, right })
    }

    /// `(left, right)` angles of `snapshot`
    pub fn angles(&self, snapshot: &AngleSnapshot) -> Result<(i32, i32)> {
        Ok((snapshot.angle(self.left)?, snapshot.angle(self.right)?))
    }
}

/// Discrete risk level published to clients as 1, 2 or 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskLevel {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl RiskLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for RiskLevel {
    type Error = FusionError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RiskLevel::Low),
            2 => Ok(RiskLevel::Medium),
            3 => Ok(RiskLevel::High),
            other => Err(FusionError::InvalidRiskLevel(other)),
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

impl Serialize for RiskLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for RiskLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        RiskLevel::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Snapshot entry extended with the aggregate motion of the emitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedEntry {
    #[serde(flatten)]
    pub reading: AngleEntry,
    pub speed_along_line: f64,
    pub risk_level: RiskLevel,
    /// Cycle time, seconds since the Unix epoch
    pub timestamp: f64,
}

/// One published message: every entry carries the same speed, risk and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotatedSample {
    entries: Vec<AnnotatedEntry>,
}

impl AnnotatedSample {
    pub fn annotate(
        snapshot: &AngleSnapshot,
        speed: f64,
        risk: RiskLevel,
        at: DateTime<Utc>,
    ) -> Self {
        let timestamp = at.timestamp_micros() as f64 / 1_000_000.0;
        let entries = snapshot
            .entries()
            .iter()
            .map(|reading| AnnotatedEntry {
                reading: reading.clone(),
                speed_along_line: speed,
                risk_level: risk,
                timestamp,
            })
            .collect();

        Self { entries }
    }

    pub fn entries(&self) -> &[AnnotatedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert sample to a JSON array terminated by a newline
    pub fn to_json_line(&self) -> std::result::Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}
