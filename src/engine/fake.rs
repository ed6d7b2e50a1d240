use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{MediaEngine, NegotiatedStreamParams, SlotAllocation, StreamId, TransportSlotId};
use crate::deferred::Deferred;
use crate::error::{Error, Result};
use crate::stats::StreamStats;

pub(crate) const FAKE_AUDIO_SECTION: &str = "m=audio 4000 RTP/AVP 0\r\n\
    c=IN IP4 192.0.2.1\r\n\
    a=ice-ufrag:4ZcD\r\n\
    a=ice-pwd:secretpwd\r\n\
    a=candidate:1 1 UDP 2130706431 192.0.2.1 4000 typ host\r\n\
    a=sendrecv\r\n";

pub(crate) const FAKE_VIDEO_SECTION: &str = "m=video 4002 RTP/AVP 96\r\n\
    c=IN IP4 192.0.2.1\r\n\
    a=ice-ufrag:9XbQ\r\n\
    a=ice-pwd:othersecret\r\n\
    a=candidate:1 1 UDP 2130706431 192.0.2.1 4002 typ host\r\n\
    a=sendrecv\r\n";

pub(crate) struct RenderCall {
    pub(crate) slot: TransportSlotId,
    pub(crate) remote_description: Option<String>,
    pub(crate) slot_index: usize,
}

pub(crate) struct HandshakeCall {
    pub(crate) slots: Vec<TransportSlotId>,
    pub(crate) local_description: String,
    pub(crate) remote_description: String,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct CreatedStream {
    pub(crate) stream: StreamId,
    pub(crate) slot: TransportSlotId,
    pub(crate) slot_index: usize,
    pub(crate) bundled: bool,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    gathering: Vec<(TransportSlotId, Deferred<bool>)>,
    security: Vec<(TransportSlotId, Deferred<bool>)>,
    render_calls: Vec<RenderCall>,
    handshakes: Vec<HandshakeCall>,
    streams: Vec<CreatedStream>,
    paused: Vec<StreamId>,
    resumed: Vec<StreamId>,
    released_streams: Vec<StreamId>,
    released_slots: Vec<TransportSlotId>,
    stats: HashMap<StreamId, StreamStats>,
}

/// In-memory engine double. Completion of gathering and security rounds is
/// driven explicitly from the test body. The state lock is never held while
/// a deferred settles, since settling re-enters the session synchronously.
#[derive(Default)]
pub(crate) struct FakeMediaEngine {
    pub(crate) fail_allocation: AtomicBool,
    state: Mutex<FakeState>,
}

impl FakeMediaEngine {
    pub(crate) fn new() -> Self {
        FakeMediaEngine::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn complete_gathering_all(&self) {
        let pending: Vec<Deferred<bool>> = {
            let state = self.lock();
            state
                .gathering
                .iter()
                .filter(|(_, d)| d.is_pending())
                .map(|(_, d)| d.clone())
                .collect()
        };
        for deferred in pending {
            deferred.resolve(true);
        }
    }

    pub(crate) fn complete_security_all(&self) {
        let pending: Vec<Deferred<bool>> = {
            let state = self.lock();
            state
                .security
                .iter()
                .filter(|(_, d)| d.is_pending())
                .map(|(_, d)| d.clone())
                .collect()
        };
        for deferred in pending {
            deferred.resolve(true);
        }
    }

    pub(crate) fn fail_security_all(&self) {
        let pending: Vec<Deferred<bool>> = {
            let state = self.lock();
            state
                .security
                .iter()
                .filter(|(_, d)| d.is_pending())
                .map(|(_, d)| d.clone())
                .collect()
        };
        for deferred in pending {
            if let Err(err) = deferred.reject(Error::ErrMediaEngine("handshake failed".to_owned()))
            {
                log::warn!("security rejection unobserved: {err}");
            }
        }
    }

    pub(crate) fn set_stats(&self, stream: StreamId, stats: StreamStats) {
        self.lock().stats.insert(stream, stats);
    }

    pub(crate) fn allocation_count(&self) -> usize {
        self.lock().gathering.len()
    }

    pub(crate) fn handshake_count(&self) -> usize {
        self.lock().handshakes.len()
    }

    pub(crate) fn last_handshake(&self) -> Option<HandshakeCall> {
        let state = self.lock();
        state.handshakes.last().map(|call| HandshakeCall {
            slots: call.slots.clone(),
            local_description: call.local_description.clone(),
            remote_description: call.remote_description.clone(),
        })
    }

    pub(crate) fn render_remote_descriptions(&self) -> Vec<Option<String>> {
        self.lock()
            .render_calls
            .iter()
            .map(|call| call.remote_description.clone())
            .collect()
    }

    pub(crate) fn created_streams(&self) -> Vec<CreatedStream> {
        self.lock().streams.clone()
    }

    pub(crate) fn paused(&self) -> Vec<StreamId> {
        self.lock().paused.clone()
    }

    pub(crate) fn resumed(&self) -> Vec<StreamId> {
        self.lock().resumed.clone()
    }

    pub(crate) fn released_streams(&self) -> Vec<StreamId> {
        self.lock().released_streams.clone()
    }

    pub(crate) fn released_slots(&self) -> Vec<TransportSlotId> {
        self.lock().released_slots.clone()
    }
}

impl MediaEngine for FakeMediaEngine {
    fn allocate_transport_slot(
        &self,
        _servers: &[crate::ice::ice_server::RTCIceServer],
    ) -> Result<SlotAllocation> {
        if self.fail_allocation.load(Ordering::SeqCst) {
            return Err(Error::ErrMediaEngine("allocation refused".to_owned()));
        }

        let mut state = self.lock();
        state.next_id += 1;
        let slot = TransportSlotId(state.next_id);
        let gathering_complete = Deferred::new();
        state.gathering.push((slot, gathering_complete.clone()));
        Ok(SlotAllocation {
            slot,
            gathering_complete,
        })
    }

    fn negotiate_security(&self, slot: TransportSlotId) -> Result<Deferred<bool>> {
        let mut state = self.lock();
        let deferred = Deferred::new();
        state.security.push((slot, deferred.clone()));
        Ok(deferred)
    }

    fn render_section(
        &self,
        slot: TransportSlotId,
        _base: &str,
        remote_description: Option<&str>,
        slot_index: usize,
    ) -> Result<String> {
        let mut state = self.lock();
        state.render_calls.push(RenderCall {
            slot,
            remote_description: remote_description.map(str::to_owned),
            slot_index,
        });
        let section = if slot_index % 2 == 0 {
            FAKE_AUDIO_SECTION
        } else {
            FAKE_VIDEO_SECTION
        };
        Ok(section.to_owned())
    }

    fn start_handshake(
        &self,
        slots: &[TransportSlotId],
        local_description: &str,
        remote_description: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        state.handshakes.push(HandshakeCall {
            slots: slots.to_vec(),
            local_description: local_description.to_owned(),
            remote_description: remote_description.to_owned(),
        });
        Ok(())
    }

    fn create_stream(
        &self,
        slot: TransportSlotId,
        params: &NegotiatedStreamParams<'_>,
    ) -> Result<StreamId> {
        let mut state = self.lock();
        state.next_id += 1;
        let stream = StreamId(state.next_id);
        state.streams.push(CreatedStream {
            stream,
            slot,
            slot_index: params.slot_index,
            bundled: params.bundled,
        });
        Ok(stream)
    }

    fn pause_sending(&self, stream: StreamId) -> Result<()> {
        self.lock().paused.push(stream);
        Ok(())
    }

    fn resume_sending(&self, stream: StreamId) -> Result<()> {
        self.lock().resumed.push(stream);
        Ok(())
    }

    fn stream_stats(&self, stream: StreamId) -> Result<StreamStats> {
        self.lock()
            .stats
            .get(&stream)
            .cloned()
            .ok_or(Error::ErrUnknownStream)
    }

    fn release_stream(&self, stream: StreamId) -> Result<()> {
        self.lock().released_streams.push(stream);
        Ok(())
    }

    fn release_transport_slot(&self, slot: TransportSlotId) -> Result<()> {
        self.lock().released_slots.push(slot);
        Ok(())
    }
}
