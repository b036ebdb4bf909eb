//! Error types for the traffic engine.
//!
//! Only caller-supplied input to the controller mutators can fail; every
//! network-facing error (resolution, connection, transmission) is absorbed
//! and retried locally by the component that hit it, so none of those appear
//! here.

pub type Result<T> = core::result::Result<T, Error>;

/// Rejections surfaced to external callers of the rate controller.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A pacing interval of zero would spin the send loops.
    #[error("invalid rate: must be greater than 0 ms")]
    InvalidRate,

    /// A zero-length burst would expire before anything observes it.
    #[error("invalid burst duration: must be greater than 0 s")]
    InvalidDuration,
}
