//! Open modes and image options

use crate::compression::CompressionType;
use crate::error::{Result, VhdError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an image directory is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OpenFlags {
    /// `r`: every chunk write is refused
    ReadOnly,
    /// `r+`: chunks are created or replaced
    #[default]
    ReadWrite,
    /// `wx+`: chunks must not exist yet
    CreateNew,
}

impl OpenFlags {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenFlags::ReadOnly => "r",
            OpenFlags::ReadWrite => "r+",
            OpenFlags::CreateNew => "wx+",
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenFlags::ReadOnly)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, OpenFlags::CreateNew)
    }
}

impl FromStr for OpenFlags {
    type Err = VhdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(OpenFlags::ReadOnly),
            "r+" | "w" | "w+" => Ok(OpenFlags::ReadWrite),
            "wx" | "wx+" => Ok(OpenFlags::CreateNew),
            other => Err(VhdError::InvalidFlags(other.to_string())),
        }
    }
}

impl TryFrom<String> for OpenFlags {
    type Error = VhdError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<OpenFlags> for String {
    fn from(flags: OpenFlags) -> Self {
        flags.as_str().to_string()
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for opening or creating a directory image
///
/// `compression` only matters for new images: an opened image takes its
/// compression from the chunk-filter ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VhdDirectoryOptions {
    pub flags: OpenFlags,
    pub compression: Option<CompressionType>,
}

impl Default for VhdDirectoryOptions {
    fn default() -> Self {
        VhdDirectoryOptions {
            flags: OpenFlags::ReadWrite,
            compression: None,
        }
    }
}

impl VhdDirectoryOptions {
    /// Defaults for [`crate::VhdDirectory::create`]
    pub fn create() -> Self {
        VhdDirectoryOptions {
            flags: OpenFlags::CreateNew,
            compression: None,
        }
    }

    pub fn read_only() -> Self {
        VhdDirectoryOptions {
            flags: OpenFlags::ReadOnly,
            compression: None,
        }
    }

    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = Some(compression);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_parsing() {
        assert_eq!("r".parse::<OpenFlags>().unwrap(), OpenFlags::ReadOnly);
        assert_eq!("r+".parse::<OpenFlags>().unwrap(), OpenFlags::ReadWrite);
        assert_eq!("wx".parse::<OpenFlags>().unwrap(), OpenFlags::CreateNew);
        assert_eq!("wx+".parse::<OpenFlags>().unwrap(), OpenFlags::CreateNew);
        assert!("a".parse::<OpenFlags>().is_err());
    }

    #[test]
    fn test_flag_properties() {
        assert!(!OpenFlags::ReadOnly.is_writable());
        assert!(OpenFlags::ReadWrite.is_writable());
        assert!(OpenFlags::CreateNew.is_exclusive());
        assert!(!OpenFlags::ReadWrite.is_exclusive());
    }

    #[test]
    fn test_options_from_json() {
        let opts: VhdDirectoryOptions =
            serde_json::from_str(r#"{"flags":"wx","compression":"brotli"}"#).unwrap();
        assert_eq!(opts.flags, OpenFlags::CreateNew);
        assert_eq!(opts.compression, Some(CompressionType::Brotli));

        let opts: VhdDirectoryOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, VhdDirectoryOptions::default());

        assert!(serde_json::from_str::<VhdDirectoryOptions>(r#"{"flags":"x"}"#).is_err());
    }

    #[test]
    fn test_builders() {
        let opts = VhdDirectoryOptions::create().with_compression(CompressionType::Gzip);
        assert_eq!(opts.flags, OpenFlags::CreateNew);
        assert_eq!(opts.compression, Some(CompressionType::Gzip));
        assert_eq!(
            VhdDirectoryOptions::default().with_flags(OpenFlags::ReadOnly),
            VhdDirectoryOptions::read_only()
        );
    }
}
