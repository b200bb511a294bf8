//! Port Interfaces
//!
//! Contracts between the tick pipeline and the outside world, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `OptionChainPort`: option-chain snapshots for PCR analysis
//! - `SignalDispatchPort`: fire-and-forget signal lookups
//! - `EventPublisherPort`: stream events for subscribers

mod event_publisher_port;
mod option_chain_port;
mod signal_dispatch_port;

pub use event_publisher_port::{EventPublisherPort, NoOpEventPublisher, StreamEvent};
pub use option_chain_port::{OptionChainError, OptionChainPort, Underlying};
pub use signal_dispatch_port::{
    DispatchFailure, DispatchOutcome, SignalDispatchPort, SignalRequest,
};
