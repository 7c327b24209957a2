use thiserror::Error;

#[derive(Error, Debug)]
pub enum VhdError {
    /// A mandatory chunk (header or footer) is absent: the directory is not a valid image
    #[error("Header and footer should exist: missing chunk {path}")]
    MissingChunk { path: String },

    #[error("{0} must be initialized before it's used")]
    Uninitialized(&'static str),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Can't write chunk {path} in an image opened read-only")]
    ReadOnly { path: String },

    #[error("Unsupported open flags: {0:?}")]
    InvalidFlags(String),

    #[error("Compression type {0} is not supported")]
    UnsupportedCompression(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Invalid {what} cookie: {found:?}")]
    InvalidCookie { what: &'static str, found: String },

    #[error("{what} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        what: &'static str,
        stored: u32,
        computed: u32,
    },

    #[error("Unsupported {what} version: {version:#010x}")]
    UnsupportedVersion { what: &'static str, version: u32 },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid block ID: {id} (table holds {max} entries)")]
    InvalidBlockId { id: u32, max: u32 },

    #[error("Invalid parent locator id: {0} (must be less than 8)")]
    InvalidParentLocator(u32),

    #[error("Invalid {what} length: expected {expected}, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Block allocation table is empty")]
    EmptyBlockTable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VhdError {
    /// True when the underlying storage handler reported a missing file
    pub fn is_not_found(&self) -> bool {
        matches!(self, VhdError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

pub type Result<T> = std::result::Result<T, VhdError>;
