// Copyright (c) 2022-2023 The MobileCoin Foundation

/// [Engine][super::Engine] errors
///
/// Host-visible responses only carry the coarse category (the `u8`
/// discriminant), details are available via logging.
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[repr(u8)]
pub enum Error {
    /// Request arrived out of the allowed sequence
    #[cfg_attr(feature = "thiserror", error("illegal state for request"))]
    ProtocolOrder = 0x00,

    /// HMAC mismatch on host-supplied data
    #[cfg_attr(feature = "thiserror", error("HMAC verification failed"))]
    Integrity = 0x01,

    /// AEAD tag mismatch on host-supplied encrypted data
    #[cfg_attr(feature = "thiserror", error("authenticated decryption failed"))]
    Authentication = 0x02,

    /// Conservation of value or blinding sum check failed
    #[cfg_attr(feature = "thiserror", error("value mismatch"))]
    ValueMismatch = 0x03,

    /// Secret key or mask does not reproduce the expected public value
    #[cfg_attr(feature = "thiserror", error("key mismatch"))]
    KeyMismatch = 0x04,

    /// Malformed or non-canonical curve point
    #[cfg_attr(feature = "thiserror", error("invalid point"))]
    InvalidPoint = 0x05,

    /// Non-canonical scalar encoding
    #[cfg_attr(feature = "thiserror", error("invalid scalar"))]
    InvalidScalar = 0x06,

    /// Permutation is not a bijection over the inputs
    #[cfg_attr(feature = "thiserror", error("invalid permutation"))]
    InvalidPermutation = 0x07,

    /// Invalid argument length
    #[cfg_attr(feature = "thiserror", error("invalid argument length"))]
    InvalidLength = 0x08,

    /// Index or count out of range
    #[cfg_attr(feature = "thiserror", error("invalid index"))]
    InvalidIndex = 0x09,

    /// Transaction rejected by the user
    #[cfg_attr(feature = "thiserror", error("cancelled by user"))]
    UserCancelled = 0x0a,

    /// Computed transaction prefix hash differs from the expected value
    #[cfg_attr(feature = "thiserror", error("transaction prefix hash mismatch"))]
    PrefixMismatch = 0x0b,

    /// Output is not owned by any known subaddress
    #[cfg_attr(feature = "thiserror", error("no matching subaddress"))]
    NoMatchingAddress = 0x0c,

    /// Key image sync hash mismatch
    #[cfg_attr(feature = "thiserror", error("invalid hash"))]
    InvalidHash = 0x0d,

    /// Range proof generation or verification failed
    #[cfg_attr(feature = "thiserror", error("range proof failed"))]
    RangeProofFailed = 0x0e,

    /// Message or session encoding failed
    #[cfg_attr(feature = "thiserror", error("encoding failed"))]
    EncodingFailed = 0x0f,

    /// Requested feature is not supported
    #[cfg_attr(feature = "thiserror", error("unsupported operation"))]
    Unsupported = 0x10,

    /// Unknown / not-yet defined error (placeholder)
    #[cfg_attr(feature = "thiserror", error("unknown"))]
    Unknown = 0xf0,
}

impl Error {
    /// Check whether an error aborts the session
    ///
    /// Protocol order rejections leave the session untouched, user
    /// cancellation is reported distinctly so the host may restart.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::ProtocolOrder | Error::UserCancelled)
    }
}

impl From<encdec::Error> for Error {
    fn from(_: encdec::Error) -> Self {
        Error::EncodingFailed
    }
}
