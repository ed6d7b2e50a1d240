use crate::ice::ice_server::RTCIceServer;

/// A Configuration defines how the peer-to-peer session is established and
/// which connectivity servers candidate gathering may use. It is applied
/// once at construction and does not change for the session's lifetime.
#[derive(Default, Clone)]
pub struct RTCConfiguration {
    /// ice_servers defines the STUN and TURN servers available to each
    /// gathering round.
    pub ice_servers: Vec<RTCIceServer>,
}

impl RTCConfiguration {
    pub(crate) fn get_ice_servers(&self) -> &[RTCIceServer] {
        &self.ice_servers
    }
}
