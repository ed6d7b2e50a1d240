use serde::{Deserialize, Serialize};

use super::sdp_type::RTCSdpType;

/// SessionDescription is used to expose local and remote session
/// descriptions, and is the negotiation payload exchanged over the
/// signaling channel.
///
/// ## Specifications
///
/// * [w3c]
///
/// [w3c]: https://w3c.github.io/webrtc-pc/#rtcsessiondescription-class
#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RTCSessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: RTCSdpType,

    pub sdp: String,
}

impl RTCSessionDescription {
    /// Given SDP text, produce an offer payload.
    pub fn offer(sdp: String) -> Self {
        RTCSessionDescription {
            sdp_type: RTCSdpType::Offer,
            sdp,
        }
    }

    /// Given SDP text, produce an answer payload.
    pub fn answer(sdp: String) -> Self {
        RTCSessionDescription {
            sdp_type: RTCSdpType::Answer,
            sdp,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_session_description_json() {
        let tests = vec![
            (
                RTCSessionDescription::offer("v=0\r\n".to_owned()),
                r#"{"type":"offer","sdp":"v=0\r\n"}"#,
            ),
            (
                RTCSessionDescription::answer("v=0\r\n".to_owned()),
                r#"{"type":"answer","sdp":"v=0\r\n"}"#,
            ),
        ];

        for (desc, expected_json) in tests {
            let json = serde_json::to_string(&desc).unwrap();
            assert_eq!(json, expected_json);

            let parsed: RTCSessionDescription = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, desc);
        }
    }
}
