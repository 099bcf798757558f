//! Real-time sample broadcaster for anchorwatch clients
//!
//! This crate provides a TCP server that fans every annotated sample out to
//! all connected clients. Clients are pure consumers: anything they send is
//! logged and discarded.
//!
//! # Features
//!
//! - Plain TCP listener, no handshake; every connection is a subscriber
//! - Newline-delimited JSON protocol, one array per sample
//! - One lifecycle task per client with a bounded outbound queue
//! - Slow, failing or disconnected clients are dropped without delaying others
//! - Optional replay of the latest sample to newly connected clients
//!
//! # Example Usage
//!
//! ```no_run
//! use anchorwatch_broadcaster::{BroadcastHub, BroadcastSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = BroadcastHub::new("127.0.0.1:12345", BroadcastSettings::default())?;
//!     let addr = hub.start().await?;
//!     println!("listening on {}", addr);
//!
//!     // let report = hub.publish(&sample).await?;
//!
//!     hub.stop(std::time::Duration::from_secs(1)).await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod client;
pub mod error;

// Re-exports
pub use broadcaster::{BroadcastHub, BroadcastSettings};
pub use client::{handle_client, ClientId, ClientRegistry, Disconnect, Frame, PublishReport};
pub use error::{BroadcasterError, Result};
