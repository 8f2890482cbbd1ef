//! trade-producer-middleware: pluggable broker transport
//!
//! Provides the Transport abstraction with NATS and in-memory implementations,
//! subject helpers, and a TSC clock for latency measurement.

pub mod error;
pub mod factory;
pub mod latency;
pub mod memory;
pub mod nats;
pub mod transport;

pub use error::TransportError;
pub use factory::{FactoryError, MiddlewareFactory};
pub use latency::{now_tsc, CLOCK};
pub use memory::InMemoryTransport;
pub use nats::{sanitize_subject_token, NatsTransport, SubjectBuilder};
pub use transport::{Subscription, Transport, TransportMessage};
