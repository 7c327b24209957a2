//! Chunk compression registry
//!
//! Every chunk of a directory image goes through exactly one compressor. The
//! registry is a fixed table built at compile time mapping a compression id to
//! its codec pair; the identity compressor has no id.
//!
//! **Design**:
//! - Levels are pinned to the fastest setting of each codec (low-latency writes)
//! - Codec work runs on tokio's blocking pool so it never stalls the scheduler
//! - `gzip` and `brotli` are the ids existing images carry in their ledger;
//!   `lz4` and `zstd` are extra codecs

use crate::error::{Result, VhdError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression applied to every chunk of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Deflate in a gzip envelope, level 1
    Gzip,
    /// Brotli, quality 0
    Brotli,
    /// LZ4 block format with prepended size
    Lz4,
    /// Zstd, level 1
    Zstd,
}

impl CompressionType {
    /// Identifier persisted in the chunk-filter ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionType::Gzip => "gzip",
            CompressionType::Brotli => "brotli",
            CompressionType::Lz4 => "lz4",
            CompressionType::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = VhdError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" => Ok(CompressionType::Gzip),
            "brotli" => Ok(CompressionType::Brotli),
            "lz4" => Ok(CompressionType::Lz4),
            "zstd" => Ok(CompressionType::Zstd),
            other => Err(VhdError::UnsupportedCompression(other.to_string())),
        }
    }
}

type Codec = fn(&[u8]) -> Result<Vec<u8>>;

/// A named pair of one-shot compress/decompress operations
#[derive(Debug)]
pub struct Compressor {
    id: Option<CompressionType>,
    compress: Codec,
    decompress: Codec,
}

static NULL_COMPRESSOR: Compressor = Compressor {
    id: None,
    compress: identity,
    decompress: identity,
};

static GZIP: Compressor = Compressor {
    id: Some(CompressionType::Gzip),
    compress: gzip_compress,
    decompress: gzip_decompress,
};

static BROTLI: Compressor = Compressor {
    id: Some(CompressionType::Brotli),
    compress: brotli_compress,
    decompress: brotli_decompress,
};

static LZ4: Compressor = Compressor {
    id: Some(CompressionType::Lz4),
    compress: lz4_compress,
    decompress: lz4_decompress,
};

static ZSTD: Compressor = Compressor {
    id: Some(CompressionType::Zstd),
    compress: zstd_compress,
    decompress: zstd_decompress,
};

/// Look up a compressor by its ledger id; `None` yields the identity compressor
pub fn get_compressor(id: Option<&str>) -> Result<&'static Compressor> {
    match id {
        None => Ok(&NULL_COMPRESSOR),
        Some(id) => Ok(Compressor::for_type(Some(id.parse()?))),
    }
}

impl Compressor {
    pub fn for_type(compression: Option<CompressionType>) -> &'static Compressor {
        match compression {
            None => &NULL_COMPRESSOR,
            Some(CompressionType::Gzip) => &GZIP,
            Some(CompressionType::Brotli) => &BROTLI,
            Some(CompressionType::Lz4) => &LZ4,
            Some(CompressionType::Zstd) => &ZSTD,
        }
    }

    pub fn id(&self) -> Option<CompressionType> {
        self.id
    }

    pub async fn compress(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        run_codec(self.id, self.compress, data).await
    }

    pub async fn decompress(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        run_codec(self.id, self.decompress, data).await
    }
}

async fn run_codec(id: Option<CompressionType>, codec: Codec, data: Vec<u8>) -> Result<Vec<u8>> {
    if id.is_none() {
        return Ok(data);
    }
    tokio::task::spawn_blocking(move || codec(&data))
        .await
        .map_err(|e| VhdError::Compression(format!("codec task failed: {}", e)))?
}

fn identity(data: &[u8]) -> Result<Vec<u8>> {
    Ok(data.to_vec())
}

fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::MultiGzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| VhdError::Compression(format!("gzip decompression failed: {}", e)))?;
    Ok(out)
}

fn brotli_compress(data: &[u8]) -> Result<Vec<u8>> {
    let params = brotli::enc::BrotliEncoderParams {
        quality: 0,
        ..Default::default()
    };
    let mut out = Vec::new();
    brotli::BrotliCompress(&mut &data[..], &mut out, &params)?;
    Ok(out)
}

fn brotli_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    brotli::BrotliDecompress(&mut &data[..], &mut out)
        .map_err(|e| VhdError::Compression(format!("brotli decompression failed: {}", e)))?;
    Ok(out)
}

fn lz4_compress(data: &[u8]) -> Result<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(data))
}

fn lz4_decompress(data: &[u8]) -> Result<Vec<u8>> {
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| VhdError::Compression(format!("LZ4 decompression failed: {}", e)))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::encode_all(data, 1)
        .map_err(|e| VhdError::Compression(format!("Zstd compression failed: {}", e)))
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>> {
    zstd::stream::decode_all(data)
        .map_err(|e| VhdError::Compression(format!("Zstd decompression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(get_compressor(None).unwrap().id(), None);
        assert_eq!(
            get_compressor(Some("gzip")).unwrap().id(),
            Some(CompressionType::Gzip)
        );
        assert_eq!(
            get_compressor(Some("brotli")).unwrap().id(),
            Some(CompressionType::Brotli)
        );
        assert!(matches!(
            get_compressor(Some("lzma")),
            Err(VhdError::UnsupportedCompression(id)) if id == "lzma"
        ));
    }

    #[test]
    fn test_every_type_has_a_codec() {
        for ty in [
            CompressionType::Gzip,
            CompressionType::Brotli,
            CompressionType::Lz4,
            CompressionType::Zstd,
        ] {
            assert_eq!(Compressor::for_type(Some(ty)).id(), Some(ty));
            assert_eq!(ty.as_str().parse::<CompressionType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_serde_ids() {
        let json = serde_json::to_string(&CompressionType::Brotli).unwrap();
        assert_eq!(json, "\"brotli\"");
        let ty: CompressionType = serde_json::from_str("\"zstd\"").unwrap();
        assert_eq!(ty, CompressionType::Zstd);
    }

    #[tokio::test]
    async fn test_codecs_restore_input() {
        let data = b"Hello, World! ".repeat(200);
        for id in ["gzip", "brotli", "lz4", "zstd"] {
            let compressor = get_compressor(Some(id)).unwrap();
            let compressed = compressor.compress(data.clone()).await.unwrap();
            assert!(compressed.len() < data.len(), "{} did not shrink", id);
            let restored = compressor.decompress(compressed).await.unwrap();
            assert_eq!(restored, data);
        }
    }

    #[tokio::test]
    async fn test_identity_is_passthrough() {
        let compressor = get_compressor(None).unwrap();
        let data = vec![1u8, 2, 3];
        assert_eq!(compressor.compress(data.clone()).await.unwrap(), data);
        assert_eq!(compressor.decompress(data.clone()).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_gzip_rejects_foreign_bytes() {
        let compressor = get_compressor(Some("gzip")).unwrap();
        let result = compressor.decompress(vec![0xAAu8; 64]).await;
        assert!(matches!(result, Err(VhdError::Compression(_))));
    }
}
