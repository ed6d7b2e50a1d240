use std::fmt;

use serde::{Deserialize, Serialize};

/// SDPType describes the type of a SessionDescription.
///
/// ## Specifications
///
/// * [w3c]
///
/// [w3c]: https://w3c.github.io/webrtc-pc/#dom-rtcsdptype
#[derive(Default, Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum RTCSdpType {
    #[default]
    Unspecified = 0,

    /// indicates that a description MUST be treated as an SDP offer.
    #[serde(rename = "offer")]
    Offer,

    /// indicates that a description MUST be treated as an SDP final answer,
    /// and the offer-answer exchange MUST be considered complete.
    #[serde(rename = "answer")]
    Answer,
}

const SDP_TYPE_OFFER_STR: &str = "offer";
const SDP_TYPE_ANSWER_STR: &str = "answer";

/// creates an SDPType from a string
impl From<&str> for RTCSdpType {
    fn from(raw: &str) -> Self {
        match raw {
            SDP_TYPE_OFFER_STR => RTCSdpType::Offer,
            SDP_TYPE_ANSWER_STR => RTCSdpType::Answer,
            _ => RTCSdpType::Unspecified,
        }
    }
}

impl fmt::Display for RTCSdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RTCSdpType::Offer => write!(f, "{SDP_TYPE_OFFER_STR}"),
            RTCSdpType::Answer => write!(f, "{SDP_TYPE_ANSWER_STR}"),
            _ => write!(f, "{}", crate::UNSPECIFIED_STR),
        }
    }
}
