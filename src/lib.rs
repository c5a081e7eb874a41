//! Client engine for server-push event streams (`text/event-stream`).
//!
//! The crate maintains one long-lived streamed GET per [`SseClient`],
//! parses the wire format incrementally, watches stream liveness, and
//! reconnects with capped exponential backoff, resuming from the last
//! seen event id. Subscribers receive parsed [`EventRecord`]s over
//! channels; connection lifecycle is reported separately.
//!
//! ```no_run
//! use evsource::{SseClient, StreamConfig};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let client = SseClient::new(
//!     StreamConfig::new("https://example.com/events")
//!         .with_heartbeat_interval(Duration::from_secs(30)),
//! );
//! let mut ticks = client.subscribe("tick");
//! client.connect();
//! while let Some(record) = ticks.recv().await {
//!     println!("{}: {}", record.event, record.data);
//! }
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod retry;

pub use auth::{AuthProvider, TokenResolver};
pub use client::{SseClient, Subscription, MAX_RETRIES_REACHED};
pub use config::{RetryPolicy, StreamConfig};
pub use dispatch::{AnyEvent, Lifecycle, SubscriberId};
pub use error::StreamError;
pub use frame::{EventRecord, FrameParser, DEFAULT_EVENT};
pub use retry::ConnState;
