//! Per-subscription wire encoding (`Filter`) and decoding (`Parser`).

use bytes::Bytes;

use crate::error::{FilterError, TransportError};
use crate::types::Event;

/// Serializes "what to subscribe to" into the payload the target chain
/// expects.
///
/// Transports may call `serialize` more than once: the managed WebSocket
/// transport re-sends it after every reconnect and the polling transport
/// on every tick, so filters with moving state (e.g. a block cursor)
/// reflect it here.
pub trait Filter: Send + Sync + 'static {
    fn serialize(&self) -> Result<Bytes, FilterError>;
}

/// Decodes raw inbound messages into generic events.
pub trait Parser: Send + Sync + 'static {
    /// `None` means the message is not an event for this subscription and
    /// must be discarded. `Some` may hold zero, one or many events.
    fn parse_response(&self, raw: &[u8]) -> Option<Vec<Event>>;

    /// Validate the subscription confirmation. An error is a protocol
    /// failure and makes the transport reconnect.
    fn confirm(&self, _raw: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}
