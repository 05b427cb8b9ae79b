//! Core type definitions and protocol constants for sigrelay.

/// Caller-chosen name a client registers under.
pub type ClientId = String;

/// Values of the envelope `type` field the relay itself understands.
///
/// Any other value (or no `type` at all) marks an opaque payload that is
/// only routed.
pub mod envelope_type {
    /// Client → relay, bind a client identifier to this connection.
    pub const REGISTER: &str = "register";
    /// Relay → client, registration accepted.
    pub const REGISTERED: &str = "registered";
    /// Relay → client, a request failed. See [`super::reason`].
    pub const ERROR: &str = "error";
}

/// Reason strings carried in `error` envelopes.
pub mod reason {
    /// Admission token missing or wrong. The relay closes the connection
    /// after sending this.
    pub const INVALID_TOKEN: &str = "invalid-token";
    /// Addressed client is not registered or its connection is gone.
    pub const TARGET_UNAVAILABLE: &str = "target-unavailable";
}
