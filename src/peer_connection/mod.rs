pub mod configuration;
pub mod peer_connection_state;
pub mod sdp;
pub mod signaling_state;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::deferred::Deferred;
use crate::engine::{MediaEngine, NegotiatedStreamParams, StreamId, TransportSlotId};
use crate::error::{Error, Result};
use crate::ice::ice_candidate::RTCIceCandidateInit;
use crate::ice::ice_connection_state::RTCIceConnectionState;
use crate::ice::ice_gathering_state::RTCIceGatheringState;
use crate::track::MediaTrack;
use configuration::RTCConfiguration;
use peer_connection_state::RTCPeerConnectionState;
use sdp::sdp_type::RTCSdpType;
use sdp::session_description::RTCSessionDescription;
use signaling_state::RTCSignalingState;

/// Cadence of the stream liveness poller once it is running.
const STATS_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Grace period between media start and the first liveness poll, giving the
/// transport time to carry its first packets.
const STATS_WARMUP: Duration = Duration::from_secs(5);

/// Cadence of the background scan for relayed remote candidates.
const RELAY_SCAN_INTERVAL: Duration = Duration::from_secs(1);

pub type OnSignalingStateChangeHdlrFn = Box<dyn FnMut(RTCSignalingState) + Send + Sync>;

pub type OnICEGatheringStateChangeHdlrFn = Box<dyn FnMut(RTCIceGatheringState) + Send + Sync>;

pub type OnICEConnectionStateChangeHdlrFn = Box<dyn FnMut(RTCIceConnectionState) + Send + Sync>;

pub type OnPeerConnectionStateChangeHdlrFn = Box<dyn FnMut(RTCPeerConnectionState) + Send + Sync>;

pub type OnAddStreamHdlrFn = Box<dyn FnMut(StreamId) + Send + Sync>;

/// One bound media stream and the track listener registered for it.
#[derive(Clone, Copy)]
struct StreamBinding {
    stream: StreamId,
    track_index: usize,
    listener_id: u64,
}

#[derive(Default)]
struct NegotiationState {
    tracks: Vec<Arc<MediaTrack>>,
    slots: Vec<TransportSlotId>,
    slots_completed: usize,
    gathering_complete: Option<Deferred<bool>>,
    remote_candidates_complete: Deferred<bool>,
    security_complete: Option<Deferred<bool>>,
    security_completed_slots: usize,
    local_description: Option<RTCSessionDescription>,
    remote_description: Option<RTCSessionDescription>,
    local_candidates: Vec<RTCIceCandidateInit>,
    remote_candidates: Vec<RTCIceCandidateInit>,
    streams: Vec<StreamBinding>,
}

pub(crate) struct PeerConnectionInternal {
    weak_self: Weak<PeerConnectionInternal>,
    configuration: RTCConfiguration,
    engine: Arc<dyn MediaEngine>,
    runtime: tokio::runtime::Handle,

    signaling_state: AtomicU8,
    ice_gathering_state: AtomicU8,
    ice_connection_state: AtomicU8,
    peer_connection_state: AtomicU8,

    is_closed: AtomicBool,
    transport_started: AtomicBool,
    description_generated: AtomicBool,
    remote_candidates_gathered: AtomicBool,
    relay_scan_started: AtomicBool,
    bundle_enabled: AtomicBool,

    negotiation: Mutex<NegotiationState>,

    on_signaling_state_change_handler: ArcSwapOption<Mutex<OnSignalingStateChangeHdlrFn>>,
    on_ice_gathering_state_change_handler: ArcSwapOption<Mutex<OnICEGatheringStateChangeHdlrFn>>,
    on_ice_connection_state_change_handler: ArcSwapOption<Mutex<OnICEConnectionStateChangeHdlrFn>>,
    on_peer_connection_state_change_handler:
        ArcSwapOption<Mutex<OnPeerConnectionStateChangeHdlrFn>>,
    on_add_stream_handler: ArcSwapOption<Mutex<OnAddStreamHdlrFn>>,
}

/// RTCPeerConnection drives one peer-to-peer media session: candidate
/// gathering, offer/answer composition, the transport handshake, media
/// stream binding and the liveness poller that tears the session down once
/// inbound traffic stalls.
///
/// ## Specifications
///
/// * [W3C]
///
/// [W3C]: https://w3c.github.io/webrtc-pc/#interface-definition
pub struct RTCPeerConnection {
    pub(crate) internal: Arc<PeerConnectionInternal>,
}

impl RTCPeerConnection {
    /// Creates a session with the given configuration and engine. Fails when
    /// an ICE server entry is malformed or when called outside an async
    /// runtime.
    pub fn new(configuration: RTCConfiguration, engine: Arc<dyn MediaEngine>) -> Result<Self> {
        for server in configuration.get_ice_servers() {
            server.validate()?;
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::ErrNoRuntime)?;

        Ok(RTCPeerConnection {
            internal: Arc::new_cyclic(|weak_self| PeerConnectionInternal {
                weak_self: weak_self.clone(),
                configuration,
                engine,
                runtime,
                signaling_state: AtomicU8::new(RTCSignalingState::Stable as u8),
                ice_gathering_state: AtomicU8::new(RTCIceGatheringState::New as u8),
                ice_connection_state: AtomicU8::new(RTCIceConnectionState::New as u8),
                peer_connection_state: AtomicU8::new(RTCPeerConnectionState::New as u8),
                is_closed: AtomicBool::new(false),
                transport_started: AtomicBool::new(false),
                description_generated: AtomicBool::new(false),
                remote_candidates_gathered: AtomicBool::new(false),
                relay_scan_started: AtomicBool::new(false),
                bundle_enabled: AtomicBool::new(false),
                negotiation: Mutex::new(NegotiationState::default()),
                on_signaling_state_change_handler: ArcSwapOption::empty(),
                on_ice_gathering_state_change_handler: ArcSwapOption::empty(),
                on_ice_connection_state_change_handler: ArcSwapOption::empty(),
                on_peer_connection_state_change_handler: ArcSwapOption::empty(),
                on_add_stream_handler: ArcSwapOption::empty(),
            }),
        })
    }

    /// on_signaling_state_change sets an event handler which is invoked when
    /// the peer connection's signaling state changes.
    pub fn on_signaling_state_change(&self, f: OnSignalingStateChangeHdlrFn) {
        self.internal
            .on_signaling_state_change_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_ice_gathering_state_change sets an event handler which is invoked
    /// when the ICE gathering state changes.
    pub fn on_ice_gathering_state_change(&self, f: OnICEGatheringStateChangeHdlrFn) {
        self.internal
            .on_ice_gathering_state_change_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_ice_connection_state_change sets an event handler which is invoked
    /// when the ICE connection state changes.
    pub fn on_ice_connection_state_change(&self, f: OnICEConnectionStateChangeHdlrFn) {
        self.internal
            .on_ice_connection_state_change_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_peer_connection_state_change sets an event handler which is
    /// invoked when the overall connection state changes.
    pub fn on_peer_connection_state_change(&self, f: OnPeerConnectionStateChangeHdlrFn) {
        self.internal
            .on_peer_connection_state_change_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// on_add_stream sets an event handler which is invoked for each media
    /// stream bound once the transport handshake concludes.
    pub fn on_add_stream(&self, f: OnAddStreamHdlrFn) {
        self.internal
            .on_add_stream_handler
            .store(Some(Arc::new(Mutex::new(f))));
    }

    /// gather_candidates starts one gathering round over `count` transport
    /// slots. The returned deferred settles with `true` once every slot has
    /// finished gathering, or with `false` when allocation fails. Calling
    /// again while a round is pending returns the pending round.
    pub fn gather_candidates(&self, count: u32) -> Deferred<bool> {
        self.internal.gather_candidates(count)
    }

    /// add_track registers a track for the session and grows the slot pool
    /// so that each track has a transport slot of its own.
    pub fn add_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.internal.add_track(track)
    }

    /// create_offer composes the local offer once candidate gathering has
    /// finished. The returned deferred settles with the composed
    /// description.
    pub fn create_offer(&self) -> Result<Deferred<RTCSessionDescription>> {
        self.internal.create_offer()
    }

    /// create_answer composes the local answer once both local gathering and
    /// the remote candidate exchange have finished.
    pub fn create_answer(&self) -> Result<Deferred<RTCSessionDescription>> {
        self.internal.create_answer()
    }

    /// set_local_description applies the locally composed description and
    /// starts the transport handshake once every precondition holds.
    pub fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        self.internal.set_local_description(desc)
    }

    /// set_remote_description applies the remote peer's description and
    /// starts the transport handshake once every precondition holds.
    pub fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        self.internal.set_remote_description(desc)
    }

    /// add_ice_candidate accepts one remote candidate, or the
    /// end-of-candidates signal when `candidate` is `None`.
    pub fn add_ice_candidate(&self, candidate: Option<RTCIceCandidateInit>) -> Result<()> {
        self.internal.add_ice_candidate(candidate)
    }

    /// local_description returns the currently applied local description, if
    /// any.
    pub fn local_description(&self) -> Option<RTCSessionDescription> {
        self.internal.negotiation_lock().local_description.clone()
    }

    /// remote_description returns the currently applied remote description,
    /// if any.
    pub fn remote_description(&self) -> Option<RTCSessionDescription> {
        self.internal.negotiation_lock().remote_description.clone()
    }

    /// local_candidates returns the candidates stripped out of the local
    /// description during composition, in description order.
    pub fn local_candidates(&self) -> Vec<RTCIceCandidateInit> {
        self.internal.negotiation_lock().local_candidates.clone()
    }

    /// signaling_state reports where the session sits in the offer/answer
    /// exchange.
    pub fn signaling_state(&self) -> RTCSignalingState {
        self.internal.signaling_state.load(Ordering::SeqCst).into()
    }

    /// ice_gathering_state reports the candidate gathering state.
    pub fn ice_gathering_state(&self) -> RTCIceGatheringState {
        self.internal
            .ice_gathering_state
            .load(Ordering::SeqCst)
            .into()
    }

    /// ice_connection_state reports the transport connectivity state.
    pub fn ice_connection_state(&self) -> RTCIceConnectionState {
        self.internal
            .ice_connection_state
            .load(Ordering::SeqCst)
            .into()
    }

    /// connection_state reports the overall session state.
    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.internal
            .peer_connection_state
            .load(Ordering::SeqCst)
            .into()
    }

    /// close shuts the session down, releasing every bound stream and
    /// transport slot. Closing an already-closed session is a no-op.
    pub fn close(&self) -> Result<()> {
        self.internal.handle_disconnect();
        Ok(())
    }
}

impl PeerConnectionInternal {
    fn negotiation_lock(&self) -> MutexGuard<'_, NegotiationState> {
        self.negotiation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn gather_candidates(&self, count: u32) -> Deferred<bool> {
        let gathering_complete = {
            let mut negotiation = self.negotiation_lock();
            if let Some(pending) = &negotiation.gathering_complete {
                if pending.is_pending() {
                    return pending.clone();
                }
            }
            let deferred = Deferred::new();
            negotiation.gathering_complete = Some(deferred.clone());
            deferred
        };

        self.do_ice_gathering_state_change(RTCIceGatheringState::Gathering);

        for _ in 0..count {
            let allocation = match self
                .engine
                .allocate_transport_slot(self.configuration.get_ice_servers())
            {
                Ok(allocation) => allocation,
                Err(err) => {
                    log::warn!("transport slot allocation failed: {err}");
                    self.do_ice_gathering_state_change(RTCIceGatheringState::Complete);
                    self.do_ice_connection_state_change(RTCIceConnectionState::Failed);
                    self.do_peer_connection_state_change(RTCPeerConnectionState::Failed);
                    gathering_complete.resolve(false);
                    return gathering_complete;
                }
            };

            {
                let mut negotiation = self.negotiation_lock();
                negotiation.slots.push(allocation.slot);
            }

            let weak = self.weak_self.clone();
            allocation.gathering_complete.on_success(move |_| {
                if let Some(internal) = weak.upgrade() {
                    internal.handle_slot_gathering_complete();
                }
            });
        }

        gathering_complete
    }

    fn handle_slot_gathering_complete(&self) {
        let settled = {
            let mut negotiation = self.negotiation_lock();
            negotiation.slots_completed += 1;
            if negotiation.slots_completed == negotiation.slots.len() {
                negotiation.gathering_complete.clone()
            } else {
                None
            }
        };

        if let Some(gathering_complete) = settled {
            self.do_ice_gathering_state_change(RTCIceGatheringState::Complete);
            gathering_complete.resolve(true);
        }
    }

    fn add_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let shortfall = {
            let mut negotiation = self.negotiation_lock();
            negotiation.tracks.push(track);
            negotiation.tracks.len().saturating_sub(negotiation.slots.len())
        };

        if shortfall > 0 {
            self.gather_candidates(shortfall as u32);
        }

        Ok(())
    }

    fn create_offer(&self) -> Result<Deferred<RTCSessionDescription>> {
        let gathering_complete = self.prepare_composition()?;

        let weak = self.weak_self.clone();
        Ok(gathering_complete.then(move |_| {
            let internal = weak.upgrade().ok_or(Error::ErrConnectionClosed)?;
            internal.compose_offer()
        }))
    }

    fn create_answer(&self) -> Result<Deferred<RTCSessionDescription>> {
        let gathering_complete = self.prepare_composition()?;

        // The answer also waits for the remote end-of-candidates signal so
        // that every remote candidate is in hand before sections render.
        let result: Deferred<RTCSessionDescription> = Deferred::new();
        let weak = self.weak_self.clone();
        let answer = result.clone();
        gathering_complete.on_success(move |_| {
            let Some(internal) = weak.upgrade() else {
                return;
            };
            let remote_candidates_complete =
                internal.negotiation_lock().remote_candidates_complete.clone();
            let weak = weak.clone();
            let answer = answer.clone();
            remote_candidates_complete.on_success(move |_| {
                let Some(internal) = weak.upgrade() else {
                    return;
                };
                match internal.compose_answer() {
                    Ok(desc) => answer.resolve(desc),
                    Err(err) => {
                        if let Err(err) = answer.reject(err) {
                            log::error!("unhandled rejection: {err}");
                        }
                    }
                }
            });
        });

        Ok(result)
    }

    /// Shared preamble of create_offer and create_answer: guard closed
    /// sessions, start a gathering round if none ran yet, and decide
    /// bundling.
    fn prepare_composition(&self) -> Result<Deferred<bool>> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let needs_round = self.negotiation_lock().gathering_complete.is_none();
        if needs_round {
            self.gather_candidates(1);
        }

        let (gathering_complete, track_count, slot_count) = {
            let negotiation = self.negotiation_lock();
            (
                negotiation.gathering_complete.clone(),
                negotiation.tracks.len(),
                negotiation.slots.len(),
            )
        };

        if slot_count == 0 {
            return Err(Error::ErrNoTransportSlots);
        }
        if track_count > 1 {
            self.bundle_enabled.store(true, Ordering::SeqCst);
        }

        gathering_complete.ok_or(Error::ErrNoTransportSlots)
    }

    fn compose_offer(&self) -> Result<RTCSessionDescription> {
        let slots: Vec<TransportSlotId> = self.negotiation_lock().slots.clone();
        let base = sdp::base_description();

        let mut raw = base.clone();
        for (slot_index, slot) in slots.iter().enumerate() {
            let section = self.engine.render_section(*slot, &base, None, slot_index)?;
            raw.push_str(&section);
        }

        let composed = sdp::compose(&raw, self.bundle_enabled.load(Ordering::SeqCst));
        {
            let mut negotiation = self.negotiation_lock();
            negotiation.local_candidates = composed.candidates;
        }
        self.description_generated.store(true, Ordering::SeqCst);
        self.start_transport_if_possible();

        Ok(RTCSessionDescription::offer(composed.sdp))
    }

    fn compose_answer(&self) -> Result<RTCSessionDescription> {
        let (slots, combined_remote) = {
            let negotiation = self.negotiation_lock();
            let remote = negotiation
                .remote_description
                .as_ref()
                .ok_or(Error::ErrNoRemoteDescription)?;
            (
                negotiation.slots.clone(),
                sdp::merge_candidates(&remote.sdp, &negotiation.remote_candidates),
            )
        };
        let base = sdp::base_description();

        let mut raw = base.clone();
        for (slot_index, slot) in slots.iter().enumerate() {
            let section =
                self.engine
                    .render_section(*slot, &base, Some(&combined_remote), slot_index)?;
            raw.push_str(&section);
        }

        let composed = sdp::compose(&raw, self.bundle_enabled.load(Ordering::SeqCst));
        {
            let mut negotiation = self.negotiation_lock();
            negotiation.local_candidates = composed.candidates;
        }
        self.description_generated.store(true, Ordering::SeqCst);
        self.start_transport_if_possible();

        Ok(RTCSessionDescription::answer(composed.sdp))
    }

    fn set_local_description(&self, desc: RTCSessionDescription) -> Result<()> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let sdp_type = desc.sdp_type;
        {
            let mut negotiation = self.negotiation_lock();
            negotiation.local_description = Some(desc);
        }

        match sdp_type {
            RTCSdpType::Offer => {
                self.do_signaling_state_change(RTCSignalingState::HaveLocalOffer)
            }
            RTCSdpType::Answer => self.do_signaling_state_change(RTCSignalingState::Stable),
            RTCSdpType::Unspecified => {}
        }

        self.start_transport_if_possible();
        Ok(())
    }

    fn set_remote_description(&self, desc: RTCSessionDescription) -> Result<()> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        if sdp::has_bundle_group(&desc.sdp) {
            self.bundle_enabled.store(true, Ordering::SeqCst);
        }

        let sdp_type = desc.sdp_type;
        {
            let mut negotiation = self.negotiation_lock();
            negotiation.remote_description = Some(desc);
        }

        match sdp_type {
            RTCSdpType::Offer => {
                self.do_signaling_state_change(RTCSignalingState::HaveRemoteOffer)
            }
            RTCSdpType::Answer => self.do_signaling_state_change(RTCSignalingState::Stable),
            RTCSdpType::Unspecified => {}
        }

        self.start_transport_if_possible();
        Ok(())
    }

    fn add_ice_candidate(&self, candidate: Option<RTCIceCandidateInit>) -> Result<()> {
        if self.is_closed.load(Ordering::SeqCst) {
            return Err(Error::ErrConnectionClosed);
        }

        let Some(candidate) = candidate else {
            self.mark_remote_candidates_gathered();
            self.start_transport_if_possible();
            return Ok(());
        };

        if self.remote_candidates_gathered.load(Ordering::SeqCst) {
            log::warn!("remote candidate after end-of-candidates ignored");
            return Ok(());
        }

        {
            let mut negotiation = self.negotiation_lock();
            negotiation.remote_candidates.push(candidate);
        }

        if !self.relay_scan_started.swap(true, Ordering::SeqCst) {
            self.spawn_relay_scan();
        }

        self.start_transport_if_possible();
        Ok(())
    }

    fn mark_remote_candidates_gathered(&self) {
        if self.remote_candidates_gathered.swap(true, Ordering::SeqCst) {
            return;
        }
        let remote_candidates_complete = self.negotiation_lock().remote_candidates_complete.clone();
        remote_candidates_complete.resolve(true);
    }

    /// Watches received remote candidates for a relayed one. Relayed
    /// candidates only show up once the remote peer has finished contacting
    /// its TURN servers, so one is as good as the end-of-candidates signal.
    fn spawn_relay_scan(&self) {
        let weak = self.weak_self.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(RELAY_SCAN_INTERVAL).await;
                let Some(internal) = weak.upgrade() else {
                    break;
                };
                if internal.is_closed.load(Ordering::SeqCst)
                    || internal.remote_candidates_gathered.load(Ordering::SeqCst)
                {
                    break;
                }
                let found_relay = internal
                    .negotiation_lock()
                    .remote_candidates
                    .iter()
                    .any(RTCIceCandidateInit::is_relay);
                if found_relay {
                    log::info!("relayed remote candidate observed, ending candidate exchange");
                    internal.mark_remote_candidates_gathered();
                    internal.start_transport_if_possible();
                    break;
                }
            }
        });
    }

    /// Starts the transport handshake exactly once, after the remote
    /// candidate exchange has ended, the local description was composed, and
    /// both descriptions are applied.
    fn start_transport_if_possible(&self) {
        if self.is_closed.load(Ordering::SeqCst) {
            return;
        }
        if !self.remote_candidates_gathered.load(Ordering::SeqCst) {
            return;
        }
        if !self.description_generated.load(Ordering::SeqCst) {
            return;
        }

        {
            let negotiation = self.negotiation_lock();
            if negotiation.local_description.is_none() || negotiation.remote_description.is_none() {
                return;
            }
        }

        if self.transport_started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.do_ice_connection_state_change(RTCIceConnectionState::Checking);
        self.do_peer_connection_state_change(RTCPeerConnectionState::Connecting);

        let (slots, local_sdp, remote_sdp, security_complete) = {
            let mut negotiation = self.negotiation_lock();
            let n = &mut *negotiation;

            let local_sdp = match &n.local_description {
                Some(desc) => sdp::merge_candidates(&desc.sdp, &n.local_candidates),
                None => String::new(),
            };
            let remote_sdp = match &n.remote_description {
                Some(desc) => sdp::merge_candidates(&desc.sdp, &n.remote_candidates),
                None => String::new(),
            };

            let needs_fresh = match &n.security_complete {
                Some(deferred) => !deferred.is_pending(),
                None => true,
            };
            if needs_fresh {
                n.security_complete = Some(Deferred::new());
                n.security_completed_slots = 0;
            }
            let security_complete = n.security_complete.get_or_insert_with(Deferred::new).clone();

            (n.slots.clone(), local_sdp, remote_sdp, security_complete)
        };

        let weak = self.weak_self.clone();
        security_complete.on_success(move |_| {
            if let Some(internal) = weak.upgrade() {
                internal.do_ice_connection_state_change(RTCIceConnectionState::Completed);
                internal.do_peer_connection_state_change(RTCPeerConnectionState::Connected);
                internal.start_media();
            }
        });
        let weak = self.weak_self.clone();
        security_complete.on_failure(move |err| {
            log::warn!("security negotiation failed: {err}");
            if let Some(internal) = weak.upgrade() {
                internal.do_ice_connection_state_change(RTCIceConnectionState::Failed);
                internal.do_peer_connection_state_change(RTCPeerConnectionState::Failed);
            }
        });

        let total_slots = slots.len();
        for slot in &slots {
            let slot_security = match self.engine.negotiate_security(*slot) {
                Ok(deferred) => deferred,
                Err(err) => {
                    if let Err(err) = security_complete.reject(err) {
                        log::warn!("security rejection unobserved: {err}");
                    }
                    return;
                }
            };

            let weak = self.weak_self.clone();
            slot_security.on_success(move |_| {
                if let Some(internal) = weak.upgrade() {
                    internal.handle_slot_security_complete(total_slots);
                }
            });
            let session_security = security_complete.clone();
            slot_security.on_failure(move |err| {
                if let Err(err) = session_security.reject(err) {
                    log::warn!("security rejection unobserved: {err}");
                }
            });
        }

        if let Err(err) = self.engine.start_handshake(&slots, &local_sdp, &remote_sdp) {
            log::warn!("transport handshake request failed: {err}");
            if let Err(err) = security_complete.reject(err) {
                log::warn!("security rejection unobserved: {err}");
            }
        }
    }

    fn handle_slot_security_complete(&self, total_slots: usize) {
        let settled = {
            let mut negotiation = self.negotiation_lock();
            negotiation.security_completed_slots += 1;
            if negotiation.security_completed_slots == total_slots {
                negotiation.security_complete.clone()
            } else {
                None
            }
        };

        if let Some(security_complete) = settled {
            security_complete.resolve(true);
        }
    }

    fn start_media(&self) {
        if self.is_closed.load(Ordering::SeqCst) {
            return;
        }

        let (slots, tracks, local_sdp, remote_sdp) = {
            let negotiation = self.negotiation_lock();
            let local_sdp = negotiation
                .local_description
                .as_ref()
                .map(|desc| desc.sdp.clone())
                .unwrap_or_default();
            let remote_sdp = negotiation
                .remote_description
                .as_ref()
                .map(|desc| desc.sdp.clone())
                .unwrap_or_default();
            (
                negotiation.slots.clone(),
                negotiation.tracks.clone(),
                local_sdp,
                remote_sdp,
            )
        };
        let bundled = self.bundle_enabled.load(Ordering::SeqCst);

        let stream_count = slots
            .len()
            .min(tracks.len())
            .min(sdp::media_section_count(&remote_sdp));

        let mut bindings = Vec::with_capacity(stream_count);
        for slot_index in 0..stream_count {
            let slot = if bundled { slots[0] } else { slots[slot_index] };
            let params = NegotiatedStreamParams {
                slot_index,
                bundled,
                local_description: &local_sdp,
                remote_description: &remote_sdp,
            };
            let stream = match self.engine.create_stream(slot, &params) {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("stream creation failed on {slot}: {err}");
                    continue;
                }
            };

            let track = &tracks[slot_index];
            let engine = Arc::clone(&self.engine);
            let listener_id = track.add_state_listener(Box::new(move |enabled| {
                let outcome = if enabled {
                    engine.resume_sending(stream)
                } else {
                    engine.pause_sending(stream)
                };
                if let Err(err) = outcome {
                    log::warn!("sending state change failed on {stream}: {err}");
                }
            }));

            if !track.is_enabled() {
                if let Err(err) = self.engine.pause_sending(stream) {
                    log::warn!("initial pause failed on {stream}: {err}");
                }
            }

            bindings.push(StreamBinding {
                stream,
                track_index: slot_index,
                listener_id,
            });
        }

        {
            let mut negotiation = self.negotiation_lock();
            negotiation.streams = bindings.clone();
        }

        for binding in &bindings {
            log::info!("media stream {} bound", binding.stream);
            self.do_add_stream(binding.stream);
        }

        self.spawn_stats_poller();
    }

    fn spawn_stats_poller(&self) {
        let weak = self.weak_self.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(STATS_WARMUP).await;
            let mut last_rx: HashMap<StreamId, u64> = HashMap::new();
            loop {
                let Some(internal) = weak.upgrade() else {
                    break;
                };
                if internal.is_closed.load(Ordering::SeqCst) {
                    break;
                }
                if internal.poll_stream_stats(&mut last_rx) {
                    internal.handle_disconnect();
                    break;
                }
                drop(internal);
                tokio::time::sleep(STATS_POLL_INTERVAL).await;
            }
        });
    }

    /// Polls every bound stream's counters, logs them, and reports whether
    /// any stream's receive timestamp froze since the previous poll.
    fn poll_stream_stats(&self, last_rx: &mut HashMap<StreamId, u64>) -> bool {
        let streams: Vec<StreamId> = self
            .negotiation_lock()
            .streams
            .iter()
            .map(|binding| binding.stream)
            .collect();

        let mut stalled = false;
        for stream in streams {
            let stats = match self.engine.stream_stats(stream) {
                Ok(stats) => stats,
                Err(err) => {
                    log::warn!("stats unavailable for {stream}: {err}");
                    continue;
                }
            };

            match serde_json::to_string(&stats) {
                Ok(line) => log::info!("stats {stream}: {line}"),
                Err(err) => log::warn!("stats serialization failed for {stream}: {err}"),
            }

            if let Some(previous) = last_rx.insert(stream, stats.last_rx_timestamp) {
                if previous == stats.last_rx_timestamp {
                    log::warn!("{stream} stopped receiving, closing session");
                    stalled = true;
                }
            }
        }
        stalled
    }

    /// Tears the session down exactly once: unhooks track listeners,
    /// releases streams and slots, and drives every state to closed.
    fn handle_disconnect(&self) {
        if self.is_closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (bindings, slots, tracks) = {
            let mut negotiation = self.negotiation_lock();
            let bindings = std::mem::take(&mut negotiation.streams);
            let slots = std::mem::take(&mut negotiation.slots);
            let tracks = negotiation.tracks.clone();
            (bindings, slots, tracks)
        };

        for binding in &bindings {
            if let Some(track) = tracks.get(binding.track_index) {
                track.remove_state_listener(binding.listener_id);
            }
            if let Err(err) = self.engine.release_stream(binding.stream) {
                log::warn!("stream release failed for {}: {err}", binding.stream);
            }
        }
        for slot in &slots {
            if let Err(err) = self.engine.release_transport_slot(*slot) {
                log::warn!("slot release failed for {slot}: {err}");
            }
        }

        self.do_ice_connection_state_change(RTCIceConnectionState::Closed);
        self.do_peer_connection_state_change(RTCPeerConnectionState::Closed);
        self.do_signaling_state_change(RTCSignalingState::Closed);
    }

    fn do_signaling_state_change(&self, state: RTCSignalingState) {
        log::info!("signaling state changed to {state}");
        self.signaling_state.store(state as u8, Ordering::SeqCst);
        if let Some(handler) = &*self.on_signaling_state_change_handler.load() {
            let mut f = handler.lock().unwrap_or_else(PoisonError::into_inner);
            f(state);
        }
    }

    fn do_ice_gathering_state_change(&self, state: RTCIceGatheringState) {
        log::info!("ICE gathering state changed to {state}");
        self.ice_gathering_state
            .store(state as u8, Ordering::SeqCst);
        if let Some(handler) = &*self.on_ice_gathering_state_change_handler.load() {
            let mut f = handler.lock().unwrap_or_else(PoisonError::into_inner);
            f(state);
        }
    }

    fn do_ice_connection_state_change(&self, state: RTCIceConnectionState) {
        log::info!("ICE connection state changed to {state}");
        self.ice_connection_state
            .store(state as u8, Ordering::SeqCst);
        if let Some(handler) = &*self.on_ice_connection_state_change_handler.load() {
            let mut f = handler.lock().unwrap_or_else(PoisonError::into_inner);
            f(state);
        }
    }

    fn do_peer_connection_state_change(&self, state: RTCPeerConnectionState) {
        log::info!("peer connection state changed to {state}");
        self.peer_connection_state
            .store(state as u8, Ordering::SeqCst);
        if let Some(handler) = &*self.on_peer_connection_state_change_handler.load() {
            let mut f = handler.lock().unwrap_or_else(PoisonError::into_inner);
            f(state);
        }
    }

    fn do_add_stream(&self, stream: StreamId) {
        if let Some(handler) = &*self.on_add_stream_handler.load() {
            let mut f = handler.lock().unwrap_or_else(PoisonError::into_inner);
            f(stream);
        }
    }
}
