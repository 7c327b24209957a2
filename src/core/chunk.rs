//! Chunk naming and directory layout
//!
//! ```text
//! <image-dir>/
//!   chunk-filters.json         filters applied to every chunk, reverse order to read
//!   header                     packed + checksummed header record
//!   footer                     packed + checksummed footer record
//!   bat                        bit array, one bit per block id
//!   parentLocatorEntry{0..7}   parent locator payloads
//!   blocks/<id / 1000>/<id % 1000>
//! ```
//!
//! Blocks are sharded in buckets of 1000 to bound directory listing cost.
//! Existing images depend on this exact arithmetic.

use std::fmt;

pub const CHUNK_FILTERS: &str = "chunk-filters.json";
pub const BLOCKS_PER_BUCKET: u32 = 1000;

/// A named, independently stored unit of an image directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkName {
    Header,
    Footer,
    Bat,
    ParentLocator(u32),
    Block(u32),
}

impl ChunkName {
    /// Path of the chunk relative to the image directory
    pub fn relative_path(&self) -> String {
        match self {
            ChunkName::Header => "header".to_string(),
            ChunkName::Footer => "footer".to_string(),
            ChunkName::Bat => "bat".to_string(),
            ChunkName::ParentLocator(id) => format!("parentLocatorEntry{}", id),
            ChunkName::Block(id) => block_path(*id),
        }
    }
}

impl fmt::Display for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_path())
    }
}

pub fn block_path(block_id: u32) -> String {
    format!(
        "blocks/{}/{}",
        block_id / BLOCKS_PER_BUCKET,
        block_id % BLOCKS_PER_BUCKET
    )
}

/// Join a relative chunk path onto the image directory
pub fn join(dir: &str, relative: &str) -> String {
    if dir.is_empty() {
        relative.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), relative)
    }
}
