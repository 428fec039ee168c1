//! # World Configuration

/// Configuration for a world.
///
/// Namespaces identify a world: payloads signed for another namespace are
/// rejected, which prevents cross-world replay of signed messages.
#[derive(Clone, Debug)]
pub struct WorldConfig {
    /// Namespace this world answers to.
    pub namespace: String,
    /// How many ticks a receipt stays readable before eviction.
    pub receipt_ttl: u64,
    /// Skip payload verification entirely (test mode).
    ///
    /// When set, the signer address is taken as empty and persona
    /// existence is not required.
    pub disable_signature_verification: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            namespace: "world".to_string(),
            receipt_ttl: 10,
            disable_signature_verification: false,
        }
    }
}

impl WorldConfig {
    /// Creates a config for the given namespace with default settings.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }
}
