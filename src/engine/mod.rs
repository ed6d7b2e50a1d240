#[cfg(test)]
pub(crate) mod fake;

use std::fmt;

use crate::deferred::Deferred;
use crate::error::Result;
use crate::ice::ice_server::RTCIceServer;
use crate::stats::StreamStats;

/// Opaque handle of one allocated transport slot. The session keeps its own
/// table mapping handles to m-line positions; the engine never learns about
/// session internals.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TransportSlotId(pub u64);

impl fmt::Display for TransportSlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// Opaque handle of one active media stream.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Outcome of a transport slot allocation: the slot handle plus the
/// deferred that settles once the slot has finished gathering candidates.
pub struct SlotAllocation {
    pub slot: TransportSlotId,
    pub gathering_complete: Deferred<bool>,
}

/// Everything the engine needs to bind a media stream after negotiation has
/// settled. With `bundled` set, all streams share the first slot's
/// transport and the engine demultiplexes by synchronization source.
pub struct NegotiatedStreamParams<'a> {
    pub slot_index: usize,
    pub bundled: bool,
    pub local_description: &'a str,
    pub remote_description: &'a str,
}

/// MediaEngine is the narrow boundary to the external transport stack
/// (candidate discovery, key exchange, packet transport, codecs).
///
/// Requests are synchronous; asynchronous outcomes travel back through the
/// `Deferred` values handed out by `allocate_transport_slot` and
/// `negotiate_security`. Implementations settle those deferreds from their
/// own event sources.
pub trait MediaEngine: Send + Sync {
    /// Allocates one transport slot and begins candidate gathering on it.
    fn allocate_transport_slot(&self, servers: &[RTCIceServer]) -> Result<SlotAllocation>;

    /// Prepares the slot's security context. The returned deferred settles
    /// when the handshake for this slot concludes.
    fn negotiate_security(&self, slot: TransportSlotId) -> Result<Deferred<bool>>;

    /// Renders the slot's media section against the session preamble in
    /// `base`. For answers, `remote_description` carries the remote offer
    /// text combined with all accumulated remote candidates.
    fn render_section(
        &self,
        slot: TransportSlotId,
        base: &str,
        remote_description: Option<&str>,
        slot_index: usize,
    ) -> Result<String>;

    /// Requests the transport handshake across all slots. The outcome is
    /// observed through the per-slot security deferreds.
    fn start_handshake(
        &self,
        slots: &[TransportSlotId],
        local_description: &str,
        remote_description: &str,
    ) -> Result<()>;

    /// Binds a media stream onto a slot once negotiation has settled.
    fn create_stream(
        &self,
        slot: TransportSlotId,
        params: &NegotiatedStreamParams<'_>,
    ) -> Result<StreamId>;

    /// Suspends outbound encoding on a stream.
    fn pause_sending(&self, stream: StreamId) -> Result<()>;

    /// Resumes outbound encoding on a stream.
    fn resume_sending(&self, stream: StreamId) -> Result<()>;

    /// Snapshot of the stream's network counters.
    fn stream_stats(&self, stream: StreamId) -> Result<StreamStats>;

    fn release_stream(&self, stream: StreamId) -> Result<()>;

    fn release_transport_slot(&self, slot: TransportSlotId) -> Result<()>;
}
