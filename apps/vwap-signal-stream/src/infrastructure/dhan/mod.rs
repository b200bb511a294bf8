//! Dhan Broker Adapters
//!
//! - [`feed`]: live market feed WebSocket client
//! - [`rest`]: option-chain REST client
//! - [`heartbeat`], [`reconnect`]: connection upkeep for the feed

pub mod feed;
pub mod heartbeat;
pub mod reconnect;
pub mod rest;

pub use feed::{ConnectionState, FeedClient, FeedClientConfig, FeedClientError, FeedEvent, FeedState};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, LivenessState};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::DhanRestClient;
