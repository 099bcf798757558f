//! One synchronized polling round across all anchors
//!
//! Every anchor is read on the blocking pool in parallel. The round waits for
//! all reads before it looks at any result, so a snapshot always reflects one
//! joint sample and costs as much as the slowest anchor, not the sum.

use std::time::Duration;

use anchorwatch_fusion::{AngleEntry, AngleSnapshot, PositionTag};
use serde::{Deserialize, Serialize};

use crate::channel::DeviceChannel;
use crate::error::{AcquisitionError, Result};
use crate::parser::FrameParser;
use crate::serial::{SerialChannel, SerialSettings};

/// Static description of one anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorDescriptor {
    /// Identifier reported inside the anchor's frames
    pub id: String,
    /// Serial endpoint, e.g. `/dev/ttyACM0`
    pub serial_port: String,
    /// Baseline offset angle
    pub theta: f64,
    /// Relative position tag
    pub pos: PositionTag,
}

/// Runtime state of one anchor: its endpoint and last known angle
pub struct Anchor {
    descriptor: AnchorDescriptor,
    parser: FrameParser,
    channel: Box<dyn DeviceChannel>,
    value: Option<i32>,
    read_errors: u32,
}

impl Anchor {
    pub fn new(descriptor: AnchorDescriptor, channel: Box<dyn DeviceChannel>) -> Self {
        let parser = FrameParser::new(descriptor.id.clone());
        Self {
            descriptor,
            parser,
            channel,
            value: None,
            read_errors: 0,
        }
    }

    pub fn descriptor(&self) -> &AnchorDescriptor {
        &self.descriptor
    }

    /// Last stored angle, `None` until the first frame arrives
    pub fn value(&self) -> Option<i32> {
        self.value
    }

    /// One bounded read; the input buffer is cleared after every read
    fn read_frame(&mut self, chunk_bytes: usize) -> Result<Option<i32>> {
        if self.channel.bytes_available()? == 0 {
            return Ok(None);
        }

        let mut buffer = vec![0u8; chunk_bytes];
        let n = match self.channel.read_chunk(&mut buffer) {
            Ok(n) => n,
            Err(e) => {
                // Stale bytes must not reach the next cycle, even after a failed read
                if let Err(clear) = self.channel.clear_input() {
                    tracing::warn!(
                        "Clearing input of anchor {} after a failed read failed: {}",
                        self.descriptor.id,
                        clear
                    );
                }
                return Err(e);
            }
        };
        let value = self.parser.parse(&buffer[..n]);
        self.channel.clear_input()?;

        Ok(value)
    }

    fn entry(&self, value: i32) -> AngleEntry {
        AngleEntry {
            theta: self.descriptor.theta,
            val: value,
            pos: self.descriptor.pos.clone(),
        }
    }
}

/// Tuning of the polling round
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionSettings {
    pub read_chunk_bytes: usize,
    /// Consecutive failed reads before an anchor is declared failed
    pub max_consecutive_read_errors: u32,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            read_chunk_bytes: SerialSettings::default().read_chunk_bytes,
            max_consecutive_read_errors: 50,
        }
    }
}

/// Outcome of one polling round
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    /// No anchor produced a new reading
    Unchanged,
    /// New readings arrived but these anchors have never reported
    Incomplete { awaiting: Vec<String> },
    /// Complete snapshot, stale values carried for anchors without news
    Ready(AngleSnapshot),
}

/// Owner of every anchor's state between rounds
pub struct Acquisition {
    anchors: Vec<Anchor>,
    configured: usize,
    settings: AcquisitionSettings,
}

impl Acquisition {
    pub fn new(anchors: Vec<Anchor>, settings: AcquisitionSettings) -> Result<Self> {
        if anchors.is_empty() {
            return Err(AcquisitionError::invalid_config("no anchors configured"));
        }
        if settings.read_chunk_bytes == 0 {
            return Err(AcquisitionError::invalid_config("read chunk must be at least one byte"));
        }

        Ok(Self {
            configured: anchors.len(),
            anchors,
            settings,
        })
    }

    /// Open a serial channel per descriptor, in order
    pub fn open_serial(
        descriptors: &[AnchorDescriptor],
        serial: &SerialSettings,
        max_consecutive_read_errors: u32,
    ) -> Result<Self> {
        let anchors = descriptors
            .iter()
            .map(|descriptor| {
                let channel = SerialChannel::open(&descriptor.serial_port, serial)?;
                Ok(Anchor::new(descriptor.clone(), Box::new(channel)))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(
            anchors,
            AcquisitionSettings {
                read_chunk_bytes: serial.read_chunk_bytes,
                max_consecutive_read_errors,
            },
        )
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Run one round: read every anchor concurrently, then merge the results
    pub async fn poll(&mut self) -> Result<Poll> {
        if self.anchors.len() != self.configured {
            return Err(AcquisitionError::Degraded {
                expected: self.configured,
                available: self.anchors.len(),
            });
        }

        let chunk_bytes = self.settings.read_chunk_bytes;
        let ids: Vec<String> = self.anchors.iter().map(|a| a.descriptor.id.clone()).collect();

        let handles: Vec<_> = std::mem::take(&mut self.anchors)
            .into_iter()
            .map(|mut anchor| {
                tokio::task::spawn_blocking(move || {
                    let outcome = anchor.read_frame(chunk_bytes);
                    (anchor, outcome)
                })
            })
            .collect();

        // Barrier: every read finishes before any state is touched
        let mut joined = Vec::with_capacity(handles.len());
        for handle in handles {
            joined.push(handle.await);
        }

        let mut changed = false;
        let mut fault = None;

        for (id, result) in ids.into_iter().zip(joined) {
            let (mut anchor, outcome) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!("Read worker for anchor {} aborted: {}", id, e);
                    fault.get_or_insert(AcquisitionError::WorkerPanicked {
                        id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            match outcome {
                Ok(Some(value)) => {
                    anchor.value = Some(value);
                    anchor.read_errors = 0;
                    changed = true;
                }
                Ok(None) => {
                    anchor.read_errors = 0;
                }
                Err(e) => {
                    anchor.read_errors += 1;
                    tracing::warn!(
                        "Read from anchor {} failed ({} in a row): {}",
                        id,
                        anchor.read_errors,
                        e
                    );
                    if anchor.read_errors > self.settings.max_consecutive_read_errors {
                        fault.get_or_insert(AcquisitionError::DeviceFailed {
                            id,
                            errors: anchor.read_errors,
                            last: e.to_string(),
                        });
                    }
                }
            }

            self.anchors.push(anchor);
        }

        if let Some(fault) = fault {
            return Err(fault);
        }

        if !changed {
            return Ok(Poll::Unchanged);
        }

        Ok(self.snapshot())
    }

    fn snapshot(&self) -> Poll {
        let awaiting: Vec<String> = self
            .anchors
            .iter()
            .filter(|a| a.value.is_none())
            .map(|a| a.descriptor.id.clone())
            .collect();

        if !awaiting.is_empty() {
            return Poll::Incomplete { awaiting };
        }

        let entries = self
            .anchors
            .iter()
            .filter_map(|a| a.value.map(|value| a.entry(value)))
            .collect();

        Poll::Ready(AngleSnapshot::new(entries))
    }

    /// Close every channel, giving up after `deadline`
    pub async fn close(self, deadline: Duration) {
        let anchors = self.anchors;
        let count = anchors.len();

        let closing = tokio::task::spawn_blocking(move || {
            for mut anchor in anchors {
                if let Err(e) = anchor.channel.close() {
                    tracing::warn!("Failed to close anchor {}: {}", anchor.descriptor.id, e);
                }
            }
        });

        match tokio::time::timeout(deadline, closing).await {
            Ok(Ok(())) => tracing::info!("Closed {} anchor channels", count),
            Ok(Err(e)) => tracing::error!("Anchor close task failed: {}", e),
            Err(_) => tracing::warn!("Closing anchor channels exceeded {:?}, abandoning", deadline),
        }
    }
}
