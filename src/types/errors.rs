use thiserror::Error;

/// Errors surfaced by the card-access collaborator.
///
/// `NoSuchRecord` is load-bearing: record-scanning loops in the directory
/// walker stop on it and propagate everything else unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CardError {
    #[error("No record with that number exists in this file")]
    NoSuchRecord,

    #[error("No file at path {0}")]
    NotFound(String),

    #[error("Selecting application {0} failed")]
    SelectFailed(String),

    #[error("Requested range is outside the file ({0})")]
    OutOfRange(String),

    #[error("Card I/O failed: {0}")]
    Io(String),
}

/// Errors from the TLV engine and the PKCS#15 schema layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Multi-byte (>31) tag numbers are out of scope.
    #[error("Multi-byte ASN.1 tags are not supported (first tag byte 0x{0:02x})")]
    UnsupportedTag(u8),

    /// Indefinite lengths and length fields wider than 4 bytes are out of scope.
    #[error("Unsupported ASN.1 length form: {0}")]
    UnsupportedLength(&'static str),

    #[error("Malformed ASN.1 encoding: {0}")]
    MalformedEncoding(&'static str),

    /// Integer-ish value needs more than 4 significant bytes.
    #[error("Value exceeds the supported range: {0}")]
    Overflow(&'static str),

    /// Requested value type is not decodable for this tag. Recoverable;
    /// callers may probe with `Asn1::try_typed_value` instead.
    #[error("Cannot decode tag 0x{tag:02x} as {requested}")]
    InvalidConversion { requested: &'static str, tag: u8 },

    /// A CIO sub-type this crate does not decode (anything outside the
    /// RSA/EC/password/opaque-DO branches). Distinct from
    /// `MalformedEncoding` so the walker can skip and continue.
    #[error("Unsupported PKCS#15 object type (tag 0x{0:02x})")]
    UnsupportedObjectType(u8),

    /// The application directory doesn't carry what the walk needs
    /// (no DDO, no ODF path). Fatal for that application.
    #[error("PKCS#15 configuration error: {0}")]
    Configuration(&'static str),

    #[error(transparent)]
    Card(#[from] CardError),
}

pub type Result<T> = std::result::Result<T, Error>;
