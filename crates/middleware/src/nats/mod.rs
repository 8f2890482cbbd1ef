//! NATS transport: subjects derived from topic and symbol, core or JetStream publish

pub mod subjects;
mod transport;

pub use subjects::{sanitize_subject_token, SubjectBuilder};
pub use transport::NatsTransport;
