//! Anchor acquisition for anchorwatch
//!
//! Polls every configured direction-finding anchor once per cycle and merges
//! the readings into an [`AngleSnapshot`](anchorwatch_fusion::AngleSnapshot).
//!
//! ## Architecture
//!
//! ```text
//! SerialChannel / MockChannel  (DeviceChannel)
//!   │  bounded read, input cleared afterwards
//!   ├─> FrameParser            "+UUDF:<id>,..." → -azimuth
//!   │
//!   └─> Acquisition::poll      one blocking-pool task per anchor, joined
//!         │
//!         └─> Poll::Unchanged | Poll::Incomplete | Poll::Ready(snapshot)
//! ```
//!
//! Anchors without a new reading keep their previous angle (stale carry).

pub mod channel;
pub mod cycle;
pub mod error;
pub mod mock;
pub mod parser;
pub mod serial;

pub use channel::DeviceChannel;
pub use cycle::{Acquisition, AcquisitionSettings, Anchor, AnchorDescriptor, Poll};
pub use error::{AcquisitionError, Result};
pub use mock::MockChannel;
pub use parser::FrameParser;
pub use serial::{SerialChannel, SerialSettings};
