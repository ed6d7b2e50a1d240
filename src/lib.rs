#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod deferred;
pub mod engine;
pub mod error;
pub mod ice;
pub mod peer_connection;
pub mod stats;
pub mod track;

pub use error::Error;

pub(crate) const UNSPECIFIED_STR: &str = "Unspecified";

/// Attribute prefix of a connectivity candidate line inside a session
/// description body.
pub(crate) const SDP_ATTRIBUTE_CANDIDATE: &str = "a=candidate:";

/// Marker line advertising incremental candidate exchange support.
pub(crate) const SDP_ATTRIBUTE_TRICKLE: &str = "a=ice-options:trickle";
