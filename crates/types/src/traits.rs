//! Network message traits.
//!
//! Transport is out of scope for this repository; these traits give the
//! envelope types in `merklemap-messages` stable type identifiers and a
//! type-safe request/response pairing for whatever transport hosts them.

/// A message that can travel between peers.
pub trait NetworkMessage {
    /// Stable identifier used for wire-level dispatch.
    fn message_type_id() -> &'static str;
}

/// Type-safe request/response pairing.
pub trait Request: NetworkMessage {
    /// The response type peers answer this request with.
    type Response: NetworkMessage;
}
