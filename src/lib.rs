//! # vhdir - VHD images stored as a directory of chunks
//!
//! `vhdir` keeps a virtual hard disk not as one monolithic file but as a
//! directory of independently addressable, individually compressed chunks.
//! It keeps the semantics of the classic VHD format (checksummed header and
//! footer, sparse allocation through a bitmap, differencing-disk parent
//! locators) and adds:
//!
//! - **Per-chunk compression** (gzip, brotli, lz4, zstd) recorded in a ledger
//! - **Sharded block files** so no directory holds more than 1000 blocks
//! - **Cheap coalescing**: blocks are copied as stored between a child and its
//!   parent when both share storage and compression
//! - **Pluggable storage** through the [`StorageHandler`] trait (local disk,
//!   in-memory, or any object store)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vhdir::{
//!     Block, CompressionType, DiskType, Footer, Header, LocalHandler, Result, VhdDirectory,
//!     VhdDirectoryOptions, VhdImage, DEFAULT_BLOCK_SIZE,
//! };
//!
//! # async fn demo() -> Result<()> {
//! let handler = Arc::new(LocalHandler::new("/var/backups"));
//! let opts = VhdDirectoryOptions::create().with_compression(CompressionType::Gzip);
//! let mut vhd = VhdDirectory::create(handler.clone(), "disk.vhd", opts).await?;
//!
//! vhd.set_footer(Footer::new(1 << 30, DiskType::Dynamic));
//! vhd.set_header(Header::new(512, DEFAULT_BLOCK_SIZE));
//!
//! let bitmap = vec![0xFF; vhd.bitmap_size()?];
//! let data = vec![0u8; DEFAULT_BLOCK_SIZE as usize];
//! vhd.write_entire_block(&Block::from_parts(3, &bitmap, &data)).await?;
//!
//! vhd.write_footer().await?;
//! vhd.write_header().await?;
//! vhd.write_block_allocation_table().await?;
//!
//! let mut vhd = VhdDirectory::open(handler, "disk.vhd", VhdDirectoryOptions::read_only()).await?;
//! vhd.read_block_allocation_table().await?;
//! assert!(vhd.contains_block(3)?);
//! # Ok(())
//! # }
//! ```

pub mod core;

#[allow(unused_imports)]
pub(crate) use crate::core::{
    bitmap, chunk, compression, directory, error, header, io, options, vhd,
};

pub use crate::core::{
    chunk::ChunkName,
    compression::{get_compressor, CompressionType, Compressor},
    directory::VhdDirectory,
    error::{Result, VhdError},
    header::{
        platform, DiskGeometry, DiskType, Footer, Header, ParentLocatorEntry, DEFAULT_BLOCK_SIZE,
        SECTOR_SIZE,
    },
    io::{LocalHandler, MemoryHandler, OutputOptions, StorageHandler},
    options::{OpenFlags, VhdDirectoryOptions},
    vhd::{coalesce_block_generic, Block, ParentLocator, VhdImage},
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
