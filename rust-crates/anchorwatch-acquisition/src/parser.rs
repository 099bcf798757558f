//! Direction-finding frame parser
//!
//! Anchors report `+UUDF:` records such as
//!
//! ```text
//! +UUDF:6C1DEBA09BF5,-42,20,0,37,"6C1DEBA09BF5","",1234,5678\r\n
//! ```
//!
//! A record carries exactly nine comma-separated fields. Field 2 is the
//! azimuth; the stored angle is its negation.

/// Token that starts every record
pub const FRAME_DELIMITER: &str = "UUDF:";

/// Fields in a well-formed record
pub const FIELD_COUNT: usize = 9;

/// Index of the azimuth field
pub const AZIMUTH_FIELD: usize = 2;

/// Extracts one anchor's angle from raw serial chunks
#[derive(Debug, Clone)]
pub struct FrameParser {
    identifier: String,
}

impl FrameParser {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Angle from the first matching well-formed record in `chunk`
    ///
    /// Records for other identifiers, with the wrong field count or with a
    /// non-numeric azimuth are skipped without error.
    pub fn parse(&self, chunk: &[u8]) -> Option<i32> {
        let text = String::from_utf8_lossy(chunk);
        text.split(FRAME_DELIMITER)
            .filter(|fragment| fragment.contains(self.identifier.as_str()))
            .find_map(parse_fragment)
    }
}

fn parse_fragment(fragment: &str) -> Option<i32> {
    let fields: Vec<&str> = fragment.split(',').collect();
    if fields.len() != FIELD_COUNT {
        return None;
    }

    let azimuth: i32 = fields[AZIMUTH_FIELD].trim().parse().ok()?;
    azimuth.checked_neg()
}
