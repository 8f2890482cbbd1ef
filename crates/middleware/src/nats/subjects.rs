use std::fmt::Write;
use std::sync::Arc;

use dashmap::DashMap;

/// Turn an exchange symbol into a single NATS subject token.
///
/// ASCII letters and digits pass through and `/` becomes `-`, so "BTC/USD"
/// reads as "BTC-USD". Every other byte is written as `_xx` hex, which keeps
/// the mapping one-to-one and free of subject delimiters and wildcards.
pub fn sanitize_subject_token(raw: &str) -> String {
    let mut token = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'/' => token.push('-'),
            b if b.is_ascii_alphanumeric() => token.push(b as char),
            b => {
                let _ = write!(token, "_{b:02x}");
            }
        }
    }
    token
}

/// Helper for NATS subject formatting under a topic root.
/// Caches formatted subjects to avoid repeated allocations in hot path.
pub struct SubjectBuilder {
    /// Topic root, e.g. "trade"
    topic: Arc<str>,
    /// Pre-computed prefix: "{topic}."
    prefix: Arc<str>,
    /// Pre-computed wildcard subject: "{topic}.>"
    wildcard: Arc<str>,
    /// Pre-computed stream name (uppercase topic, `.`/`-` replaced by `_`)
    stream_name: Arc<str>,
    /// Cache of raw symbol -> full subject
    cache: DashMap<Arc<str>, Arc<str>>,
}

impl SubjectBuilder {
    /// Create a new SubjectBuilder rooted at `topic`
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let stream_name: String = topic
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        Self {
            prefix: format!("{}.", topic).into(),
            wildcard: format!("{}.>", topic).into(),
            stream_name: stream_name.into(),
            topic: topic.into(),
            cache: DashMap::new(),
        }
    }

    /// Topic root
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build subject for a symbol: {topic}.{sanitized symbol}
    /// Cached - first call allocates, subsequent calls return Arc clone (cheap).
    /// Returns None for an empty symbol.
    #[inline]
    pub fn for_symbol(&self, symbol: &str) -> Option<Arc<str>> {
        if let Some(cached) = self.cache.get(symbol) {
            return Some(Arc::clone(cached.value()));
        }

        let token = sanitize_subject_token(symbol);
        if token.is_empty() {
            return None;
        }
        let subject: Arc<str> = format!("{}{}", self.prefix, token).into();
        self.cache.insert(symbol.into(), Arc::clone(&subject));
        Some(subject)
    }

    /// Wildcard subject covering every symbol: {topic}.>
    #[inline]
    pub fn all(&self) -> &str {
        &self.wildcard
    }

    /// JetStream stream name for the topic
    #[inline]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }
}
