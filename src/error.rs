use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// ErrConnectionClosed indicates an operation executed after the
    /// connection has already been closed.
    #[error("connection closed")]
    ErrConnectionClosed,

    /// ErrNoTransportSlots indicates that createOffer/createAnswer was
    /// invoked before any transport slot could be allocated.
    #[error("no transport slots allocated")]
    ErrNoTransportSlots,

    /// ErrNoRemoteDescription indicates that an operation was rejected because
    /// the remote description is not set.
    #[error("remote description is not set")]
    ErrNoRemoteDescription,

    /// ErrNoTurnCredentials indicates that a TURN server URL was provided
    /// without required credentials.
    #[error("turn server credentials required")]
    ErrNoTurnCredentials,

    /// ErrInvalidIceServerUrl indicates that an ICE server URL could not be
    /// parsed or carries an unsupported scheme.
    #[error("invalid ice server url: {0}")]
    ErrInvalidIceServerUrl(String),

    /// ErrNoRuntime indicates that the connection was constructed outside of
    /// an async runtime context, so maintenance timers cannot be scheduled.
    #[error("no async runtime available")]
    ErrNoRuntime,

    /// ErrUnknownTransportSlot indicates a transport slot handle that is not
    /// present in the engine's slot table.
    #[error("unknown transport slot handle")]
    ErrUnknownTransportSlot,

    /// ErrUnknownStream indicates a media stream handle that is not present
    /// in the engine's stream table.
    #[error("unknown stream handle")]
    ErrUnknownStream,

    /// ErrMediaEngine carries a failure reported by the external media
    /// engine.
    #[error("media engine: {0}")]
    ErrMediaEngine(String),
}
