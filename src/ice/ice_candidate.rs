use serde::{Deserialize, Serialize};

/// Marker of a relay-typed candidate inside the candidate descriptor text.
pub(crate) const CANDIDATE_TYP_RELAY: &str = "typ relay";

/// RTCIceCandidateInit is the wire representation of one connectivity
/// candidate, exchanged with the remote peer over the signaling channel.
///
/// ## Specifications
///
/// * [MDN]
/// * [W3C]
///
/// [MDN]: https://developer.mozilla.org/en-US/docs/Web/API/RTCIceCandidate
/// [W3C]: https://w3c.github.io/webrtc-pc/#dom-rtcicecandidateinit
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RTCIceCandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    pub username_fragment: Option<String>,
}

impl RTCIceCandidateInit {
    /// Reports whether the candidate descriptor names a relayed network
    /// path.
    pub fn is_relay(&self) -> bool {
        self.candidate.contains(CANDIDATE_TYP_RELAY)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_ice_candidate_serialization() {
        let candidate = RTCIceCandidateInit {
            candidate: "candidate:1 1 UDP 2130706431 192.0.2.1 4000 typ host".to_owned(),
            sdp_mid: Some("audio".to_owned()),
            sdp_mline_index: Some(0),
            username_fragment: Some("4ZcD".to_owned()),
        };

        let json = serde_json::to_string(&candidate).unwrap();
        assert_eq!(
            json,
            r#"{"candidate":"candidate:1 1 UDP 2130706431 192.0.2.1 4000 typ host","sdpMid":"audio","sdpMLineIndex":0,"usernameFragment":"4ZcD"}"#
        );

        let parsed: RTCIceCandidateInit = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, candidate);
    }

    #[test]
    fn test_ice_candidate_is_relay() {
        let relay = RTCIceCandidateInit {
            candidate: "candidate:3 1 UDP 41885439 198.51.100.7 50000 typ relay raddr 192.0.2.1"
                .to_owned(),
            ..Default::default()
        };
        assert!(relay.is_relay());

        let host = RTCIceCandidateInit {
            candidate: "candidate:1 1 UDP 2130706431 192.0.2.1 4000 typ host".to_owned(),
            ..Default::default()
        };
        assert!(!host.is_relay());
    }
}
