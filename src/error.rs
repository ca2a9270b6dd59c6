use thiserror::Error;

/// Errors raised along the auction pipeline.
///
/// `Validation` and `UnmatchedBid` are always scoped to a single bidder and
/// end up in that bidder's status; `Cache` and `UnknownAccount` are fatal to
/// the whole auction and map to a top-level response status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreBidError {
    #[error("{0}")]
    Validation(String),

    /// An upstream bid echoed an imp id no ad unit bid was issued for.
    #[error("Unknown ad unit code '{0}'")]
    UnmatchedBid(String),

    #[error("{0}")]
    Transport(String),

    #[error("Timed out")]
    Timeout,

    #[error("{0}")]
    Cache(String),

    #[error("Unknown account")]
    UnknownAccount,
}

impl PreBidError {
    pub fn validation(message: impl Into<String>) -> Self {
        PreBidError::Validation(message.into())
    }
}
