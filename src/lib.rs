//! # Bossfeed
//!
//! Turns decoded game-state messages into boss encounter telemetry and
//! uploads it to the BP Timer HP ingestion API.
//!
//! ## Architecture
//!
//! ```text
//! MessageSource -> EncounterTracker -> Publisher -> Transport -> ingestion API
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Decoded messages and boss events
//! - [`normalize`]: Entity extraction from loosely shaped payloads
//! - [`tracker`]: Per-monster encounter state machine
//! - [`publisher`]: Delivery with retry, backoff and dry-run
//! - [`transport`]: HTTP seam used by the publisher
//! - [`source`]: Message sources, including JSONL replay
//! - [`pipeline`]: The sequential relay loop and run metrics
//! - [`mock_ingest`]: Local mock of the ingestion API

pub mod clock;
pub mod config;
pub mod event;
pub mod metrics;
pub mod mock_ingest;
pub mod normalize;
pub mod pipeline;
pub mod publisher;
pub mod shutdown;
pub mod source;
pub mod tracker;
pub mod transport;

// Re-export commonly used types at crate root
pub use config::{BossfeedConfig, PublisherConfig};
pub use event::{BossEvent, DecodedMessage, EventType};
pub use pipeline::Relay;
pub use publisher::{DeliveryError, PublishResult, Publisher};
pub use tracker::{BossNames, EncounterTracker};
pub use transport::{HttpTransport, Transport};
