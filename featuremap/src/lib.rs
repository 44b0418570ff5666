//! # Featuremap
//!
//! Featuremap lets any number of clients draw on a shared map at the same
//! time. Every edit is an event published to a message bus, and the bus's
//! ordered, replayable log of a room is the only source of truth: each
//! client rebuilds the room's features by applying that log in order,
//! including the events it published itself.
//!
//! Because the log is ordered and application is deterministic, every
//! client ends up with the same features. And because it's replayable, any
//! past state of the room can be rebuilt by replaying its first few events.
//!
//! ## Getting Started
//!
//! Run a bus (`cargo run --bin featuremap-bus`), then point an engine at
//! it. The engine calls your [RenderSink] as features change.
//!
//! ``` no_run
//! use featuremap::{
//!     EngineConfig, FeatureRecord, GrpcBus, RenderSink, SessionConfig, SyncEngine,
//! };
//!
//! struct Console;
//!
//! impl RenderSink for Console {
//!     fn on_feature_upserted(&self, record: &FeatureRecord) {
//!         println!("draw {} in {}", record.id, record.color);
//!     }
//!
//!     fn on_feature_cleared(&self) {
//!         println!("clear");
//!     }
//! }
//!
//! # async fn run() -> Result<(), featuremap::EngineError> {
//! // `?room=harbour` joins the harbour room; without it you get a room of
//! // your own.
//! let session = SessionConfig::from_query("?room=harbour");
//! let mut engine = SyncEngine::new(GrpcBus::new(), session, EngineConfig::default(), Console);
//! engine.connect().await?;
//!
//! // Edits are throttled, published, and applied when they come back.
//! engine.submit_add(FeatureRecord::new("pier", r#"{"type":"Point"}"#).with_color("red"));
//!
//! // Show the room as it was after its first ten events.
//! engine.scrub_to(10).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate feature flags
//!
//! - `sqlite`: Keep a bus's retained logs in sqlite so they survive
//! restarts. Enabled by default.

pub mod bus;
pub mod codec;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod event;
pub mod persistence;
pub mod proto;
pub mod store;
pub mod throttle;

pub use bus::{Bus, Connection, DeliverPolicy, GrpcBus, Headers, LocalBus, Subscription};
pub use config::{EngineConfig, SessionConfig};
pub use engine::{ChannelSink, EngineState, RenderEvent, RenderSink, SyncEngine, SyncState};
pub use error::{EngineError, EngineResult};
pub use event::{Event, FeatureRecord};
pub use store::FeatureStore;
pub use throttle::ThrottleGate;
