use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// RTCIceServer describes a single STUN or TURN server usable for
/// establishing a connection with a peer.
///
/// ## Specifications
///
/// * [MDN]
/// * [W3C]
///
/// [MDN]: https://developer.mozilla.org/en-US/docs/Web/API/RTCIceServer
/// [W3C]: https://w3c.github.io/webrtc-pc/#dom-rtciceserver
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct RTCIceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl RTCIceServer {
    pub(crate) fn parse_url(&self, url_str: &str) -> Result<Url> {
        Url::parse(url_str).map_err(|_| Error::ErrInvalidIceServerUrl(url_str.to_owned()))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for url_str in &self.urls {
            let url = self.parse_url(url_str)?;
            match url.scheme() {
                "stun" | "stuns" => {}
                "turn" | "turns" => {
                    // https://www.w3.org/TR/webrtc/#set-the-configuration (step #11.3.2)
                    if self.username.is_empty() || self.credential.is_empty() {
                        return Err(Error::ErrNoTurnCredentials);
                    }
                }
                _ => return Err(Error::ErrInvalidIceServerUrl(url_str.to_owned())),
            }
        }

        Ok(())
    }

    /// Reports whether any of the configured URLs points at a relay (TURN)
    /// server.
    pub(crate) fn is_relay(&self) -> bool {
        self.urls.iter().any(|url_str| {
            matches!(
                self.parse_url(url_str).map(|u| u.scheme().to_owned()),
                Ok(scheme) if scheme == "turn" || scheme == "turns"
            )
        })
    }
}
