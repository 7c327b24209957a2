//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use vhdir::{
    Block, CompressionType, DiskType, Footer, Header, MemoryHandler, StorageHandler,
    VhdDirectory, VhdDirectoryOptions, VhdImage,
};

/// Small blocks keep the tests fast: 128 sectors, one sector of bitmap
pub const BLOCK_SIZE: u32 = 64 * 1024;

/// Create an image with header and footer set in memory but nothing written
pub async fn create_image(
    handler: Arc<dyn StorageHandler>,
    path: &str,
    compression: Option<CompressionType>,
    max_blocks: u32,
) -> VhdDirectory {
    let opts = VhdDirectoryOptions {
        compression,
        ..VhdDirectoryOptions::create()
    };
    let mut vhd = VhdDirectory::create(handler, path, opts).await.unwrap();
    vhd.set_footer(Footer::new(
        max_blocks as u64 * BLOCK_SIZE as u64,
        DiskType::Dynamic,
    ));
    vhd.set_header(Header::new(max_blocks, BLOCK_SIZE));
    vhd
}

/// Persist footer, header (with ledger) and BAT
pub async fn finish(vhd: &mut VhdDirectory) {
    vhd.write_footer().await.unwrap();
    vhd.write_header().await.unwrap();
    vhd.write_block_allocation_table().await.unwrap();
}

/// A block whose data is zeros followed by a byte pattern seeded by `seed`
pub fn patterned_block(vhd: &VhdDirectory, id: u32, len: usize, seed: u8) -> Block {
    let bitmap_size = vhd.bitmap_size().unwrap();
    let mut buffer = vec![0u8; len];
    for (i, b) in buffer.iter_mut().enumerate().skip(bitmap_size + len / 4) {
        *b = (i as u8).wrapping_mul(31).wrapping_add(seed);
    }
    for b in buffer.iter_mut().take(bitmap_size) {
        *b = 0xFF;
    }
    Block::new(id, bitmap_size, buffer)
}

/// Every stored file and its bytes
pub async fn snapshot(handler: &MemoryHandler) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for path in handler.paths() {
        let data = handler.read_file(&path).await.unwrap();
        files.insert(path, data);
    }
    files
}
