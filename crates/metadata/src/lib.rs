//! trade-producer-metadata: configuration types for the trade producer

pub mod error;
pub mod feed;
pub mod environment;

pub use error::MetadataError;
pub use feed::{FeedConfig, DEFAULT_ACK_FRAMES, KRAKEN_WS_URL};
pub use environment::{
    DeliveryConfig, Environment, ReconnectConfig, TransportConfig, TransportType,
};
