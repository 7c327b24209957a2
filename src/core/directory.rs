//! Directory-backed VHD
//!
//! Each part of the disk image is an independent chunk file below the image
//! directory (see [`crate::chunk`] for the layout), compressed with the
//! compressor recorded in the chunk-filter ledger.
//!
//! In-memory state is only persisted by explicit calls: writing a block sets
//! its BAT bit in memory, and [`VhdDirectory::write_block_allocation_table`]
//! flushes the table. Callers batch many block writes per flush; a crash in
//! between leaves extra block chunks whose bit was never persisted, never a
//! set bit without its chunk.
//!
//! An image is not internally synchronized: serialize mutating calls per
//! instance.

use crate::bitmap;
use crate::chunk::{join, ChunkName, CHUNK_FILTERS};
use crate::compression::{get_compressor, CompressionType, Compressor};
use crate::error::{Result, VhdError};
use crate::header::{platform, sectors_to_bytes, Footer, Header, PARENT_LOCATOR_ENTRIES};
use crate::io::{OutputOptions, StorageHandler};
use crate::options::VhdDirectoryOptions;
use crate::vhd::{
    check_locator_id, coalesce_block_generic, locator_data_length, Block, ParentLocator,
    VhdImage,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Late-initialized image state
#[derive(Debug, Clone)]
enum Slot<T> {
    Uninitialized,
    Ready(T),
}

impl<T> Slot<T> {
    fn get(&self, what: &'static str) -> Result<&T> {
        match self {
            Slot::Ready(value) => Ok(value),
            Slot::Uninitialized => Err(VhdError::Uninitialized(what)),
        }
    }

    fn get_mut(&mut self, what: &'static str) -> Result<&mut T> {
        match self {
            Slot::Ready(value) => Ok(value),
            Slot::Uninitialized => Err(VhdError::Uninitialized(what)),
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self, Slot::Ready(_))
    }
}

/// A VHD image stored as a directory of compressed chunks on a [`StorageHandler`]
pub struct VhdDirectory {
    handler: Arc<dyn StorageHandler>,
    path: String,
    opts: VhdDirectoryOptions,
    header: Slot<Header>,
    footer: Slot<Footer>,
    block_table: Slot<Vec<u8>>,
    compressor: Slot<&'static Compressor>,
}

impl std::fmt::Debug for VhdDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VhdDirectory")
            .field("path", &self.path)
            .field("opts", &self.opts)
            .field("header", &self.header.is_ready())
            .field("footer", &self.footer.is_ready())
            .field("block_table", &self.block_table.is_ready())
            .finish()
    }
}

impl VhdDirectory {
    fn new(
        handler: Arc<dyn StorageHandler>,
        path: String,
        opts: VhdDirectoryOptions,
        compressor: Slot<&'static Compressor>,
    ) -> Self {
        VhdDirectory {
            handler,
            path,
            opts,
            header: Slot::Uninitialized,
            footer: Slot::Uninitialized,
            block_table: Slot::Uninitialized,
            compressor,
        }
    }

    /// Attach to an existing image directory
    ///
    /// Header and footer are read immediately so a malformed directory fails
    /// here rather than on first use. The block allocation table is not
    /// loaded; call [`read_block_allocation_table`](Self::read_block_allocation_table).
    pub async fn open(
        handler: Arc<dyn StorageHandler>,
        path: impl Into<String>,
        opts: VhdDirectoryOptions,
    ) -> Result<Self> {
        let path = path.into();
        let mut vhd = VhdDirectory::new(handler, path, opts, Slot::Uninitialized);
        vhd.read_header_and_footer().await?;
        info!("Opened VHD directory {} ({})", vhd.path, vhd.opts.flags);
        Ok(vhd)
    }

    /// Create the image directory; header and footer must be set and written by the caller
    pub async fn create(
        handler: Arc<dyn StorageHandler>,
        path: impl Into<String>,
        opts: VhdDirectoryOptions,
    ) -> Result<Self> {
        let path = path.into();
        handler.mkdir(&path).await?;
        let compressor = Compressor::for_type(opts.compression);
        info!(
            "Created VHD directory {} (compression={:?})",
            path,
            compressor.id()
        );
        Ok(VhdDirectory::new(handler, path, opts, Slot::Ready(compressor)))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn handler(&self) -> &Arc<dyn StorageHandler> {
        &self.handler
    }

    pub fn options(&self) -> &VhdDirectoryOptions {
        &self.opts
    }

    pub fn compression_type(&self) -> Result<Option<CompressionType>> {
        Ok(self.compressor.get("compressor")?.id())
    }

    pub fn header_mut(&mut self) -> Result<&mut Header> {
        self.header.get_mut("header")
    }

    pub fn footer_mut(&mut self) -> Result<&mut Footer> {
        self.footer.get_mut("footer")
    }

    /// Install a header; (re)allocates an empty block allocation table sized for it
    pub fn set_header(&mut self, header: Header) {
        self.block_table = Slot::Ready(vec![0u8; bitmap::bytes_for(header.max_table_entries)]);
        self.header = Slot::Ready(header);
    }

    pub fn set_footer(&mut self, footer: Footer) {
        self.footer = Slot::Ready(footer);
    }

    /// Full path of a chunk, as handed to the storage handler
    pub fn chunk_path(&self, name: ChunkName) -> String {
        join(&self.path, &name.relative_path())
    }

    fn chunk_filters_path(&self) -> String {
        join(&self.path, CHUNK_FILTERS)
    }

    pub async fn read_chunk(&self, name: ChunkName) -> Result<Vec<u8>> {
        let compressor = self.compressor.get("compressor")?;
        let raw = self.handler.read_file(&self.chunk_path(name)).await?;
        compressor.decompress(raw).await
    }

    pub async fn write_chunk(&self, name: ChunkName, buffer: &[u8]) -> Result<()> {
        let path = self.chunk_path(name);
        if !self.opts.flags.is_writable() {
            return Err(VhdError::ReadOnly { path });
        }
        let compressed = self
            .compressor
            .get("compressor")?
            .compress(buffer.to_vec())
            .await?;
        let opts = OutputOptions {
            exclusive: self.opts.flags.is_exclusive(),
        };
        self.handler.output_file(&path, &compressed, opts).await?;
        Ok(())
    }

    async fn read_mandatory_chunk(&self, name: ChunkName) -> Result<Vec<u8>> {
        self.read_chunk(name).await.map_err(|e| {
            if e.is_not_found() {
                VhdError::MissingChunk {
                    path: self.chunk_path(name),
                }
            } else {
                e
            }
        })
    }

    /// Read and validate header and footer, replacing any block table in memory
    pub async fn read_header_and_footer(&mut self) -> Result<()> {
        if !self.compressor.is_ready() {
            self.read_chunk_filters().await?;
        }
        let buf_header = self.read_mandatory_chunk(ChunkName::Header).await?;
        let buf_footer = self.read_mandatory_chunk(ChunkName::Footer).await?;

        let footer = Footer::unpack(&buf_footer)?;
        let header = Header::unpack(&buf_header, &footer)?;

        self.footer = Slot::Ready(footer);
        self.set_header(header);
        Ok(())
    }

    pub async fn write_footer(&mut self) -> Result<()> {
        let footer = self.footer.get_mut("footer")?;
        let raw = footer.pack();
        debug!(
            "Write footer (checksum={}). (data={})",
            footer.checksum,
            hex::encode(&raw)
        );
        self.write_chunk(ChunkName::Footer, &raw).await
    }

    /// Write the header, then the chunk-filter ledger describing its compression
    pub async fn write_header(&mut self) -> Result<()> {
        let header = self.header.get_mut("header")?;
        let raw = header.pack();
        debug!(
            "Write header (checksum={}). (data={})",
            header.checksum,
            hex::encode(&raw)
        );
        self.write_chunk(ChunkName::Header, &raw).await?;
        self.write_chunk_filters().await
    }

    pub async fn read_block_allocation_table(&mut self) -> Result<()> {
        let buffer = self.read_chunk(ChunkName::Bat).await?;
        self.block_table = Slot::Ready(buffer);
        Ok(())
    }

    pub async fn write_block_allocation_table(&self) -> Result<()> {
        let table = self.block_table.get("block allocation table")?;
        if table.is_empty() {
            return Err(VhdError::EmptyBlockTable);
        }
        self.write_chunk(ChunkName::Bat, table).await
    }

    pub fn contains_block(&self, block_id: u32) -> Result<bool> {
        let table = self.block_table.get("block allocation table")?;
        Ok(bitmap::test(table, block_id))
    }

    /// Ids whose BAT bit is set
    pub fn allocated_blocks(&self) -> Result<Vec<u32>> {
        let table = self.block_table.get("block allocation table")?;
        Ok(bitmap::iter_set(table).collect())
    }

    /// No-op: a directory has no fixed on-disk table region to grow
    pub async fn ensure_bat_size(&mut self, _entries: u32) -> Result<()> {
        Ok(())
    }

    /// Read a block; bitmap-only reads are not supported by this backend
    pub async fn read_block(&self, block_id: u32, only_bitmap: bool) -> Result<Block> {
        if only_bitmap {
            return Err(VhdError::NotImplemented(format!(
                "reading 'bitmap of block' {} in a VhdDirectory",
                block_id
            )));
        }
        let buffer = self.read_chunk(ChunkName::Block(block_id)).await?;
        Ok(Block::new(block_id, self.bitmap_size()?, buffer))
    }

    fn check_block_id(&self, block_id: u32) -> Result<()> {
        let max = self.header.get("header")?.max_table_entries;
        self.block_table.get("block allocation table")?;
        if block_id >= max {
            return Err(VhdError::InvalidBlockId { id: block_id, max });
        }
        Ok(())
    }

    /// Write bitmap and data of a block and mark it allocated in memory
    pub async fn write_entire_block(&mut self, block: &Block) -> Result<()> {
        self.check_block_id(block.id)?;
        self.write_chunk(ChunkName::Block(block.id), &block.buffer)
            .await?;
        self.mark_allocated(block.id)
    }

    fn mark_allocated(&mut self, block_id: u32) -> Result<()> {
        let table = self.block_table.get_mut("block allocation table")?;
        if !bitmap::set(table, block_id) {
            // a table read from disk may be shorter than the header allows
            table.resize(bitmap::bytes_for(block_id + 1), 0);
            bitmap::set(table, block_id);
        }
        Ok(())
    }

    pub async fn read_parent_locator_data(&self, id: u32) -> Result<Vec<u8>> {
        check_locator_id(id)?;
        self.read_chunk(ChunkName::ParentLocator(id)).await
    }

    /// Store locator data in its own chunk and clear the header's platform offset
    pub async fn write_parent_locator_data(&mut self, id: u32, data: &[u8]) -> Result<()> {
        let slot = check_locator_id(id)?;
        self.header.get("header")?;
        self.write_chunk(ChunkName::ParentLocator(id), data).await?;
        self.header_mut()?.parent_locator_entry[slot].platform_data_offset = 0;
        Ok(())
    }

    pub async fn read_parent_locator(&self, id: u32) -> Result<ParentLocator> {
        let slot = check_locator_id(id)?;
        let platform_code = self.header.get("header")?.parent_locator_entry[slot].platform_code;
        let data = self.read_parent_locator_data(id).await?;
        Ok(ParentLocator {
            id,
            platform_code,
            data,
        })
    }

    pub async fn write_parent_locator(&mut self, locator: &ParentLocator) -> Result<()> {
        let slot = check_locator_id(locator.id)?;
        let length = locator_data_length(locator.data.len())?;
        self.write_parent_locator_data(locator.id, &locator.data)
            .await?;
        let entry = &mut self.header_mut()?.parent_locator_entry[slot];
        entry.platform_code = locator.platform_code;
        entry.platform_data_length = length;
        Ok(())
    }

    /// Point slot 0 at `file_name` (W2ku, UTF-16LE) and empty the other slots
    pub async fn set_unique_parent_locator(&mut self, file_name: &str) -> Result<()> {
        let data: Vec<u8> = file_name
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        self.write_parent_locator(&ParentLocator {
            id: 0,
            platform_code: platform::W2KU,
            data,
        })
        .await?;
        for id in 1..PARENT_LOCATOR_ENTRIES as u32 {
            self.write_parent_locator(&ParentLocator {
                id,
                platform_code: platform::NONE,
                data: Vec::new(),
            })
            .await?;
        }
        Ok(())
    }

    async fn write_chunk_filters(&self) -> Result<()> {
        let path = self.chunk_filters_path();
        match self.compression_type()? {
            None => {
                debug!("Remove chunk filters {}", path);
                match self.handler.unlink(&path).await {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!("Chunk filters {} already absent", path);
                    }
                    other => other?,
                }
            }
            Some(compression) => {
                debug!("Write chunk filters {} ([{}])", path, compression);
                let raw = serde_json::to_vec(&[compression.as_str()])?;
                self.handler.write_file(&path, &raw).await?;
            }
        }
        Ok(())
    }

    /// Load the compressor from the chunk-filter ledger; no ledger means uncompressed
    pub async fn read_chunk_filters(&mut self) -> Result<()> {
        let path = self.chunk_filters_path();
        let filters: Vec<String> = match self.handler.read_file(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if filters.len() > 1 {
            debug!(
                "Chunk filters {:?} in {}: only the first one is applied",
                filters, self.path
            );
        }
        let compressor = get_compressor(filters.first().map(String::as_str))?;
        self.compressor = Slot::Ready(compressor);
        Ok(())
    }

    fn shares_storage_with(&self, other: &VhdDirectory) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.handler) as *const (),
            Arc::as_ptr(&other.handler) as *const (),
        )
    }

    /// Merge block `block_id` of `child` into this image
    ///
    /// When the child is another directory on the same handler with the same
    /// compression, the stored chunk is copied as is and the full block size is
    /// reported. Otherwise the block is decoded and rewritten through
    /// [`coalesce_block_generic`], which reports the data bytes moved.
    pub async fn coalesce_block(&mut self, child: &dyn VhdImage, block_id: u32) -> Result<u64> {
        let same_format = match child.as_directory() {
            Some(dir) => {
                self.shares_storage_with(dir)
                    && dir.compression_type()? == self.compression_type()?
            }
            None => false,
        };

        let dir = match child.as_directory() {
            Some(dir) if same_format => dir,
            _ => {
                debug!("Coalesce block {} into {} by rewrite", block_id, self.path);
                return coalesce_block_generic(self, child, block_id).await;
            }
        };

        self.check_block_id(block_id)?;
        let dest = self.chunk_path(ChunkName::Block(block_id));
        if !self.opts.flags.is_writable() {
            return Err(VhdError::ReadOnly { path: dest });
        }
        let src = dir.chunk_path(ChunkName::Block(block_id));
        debug!("Coalesce block {} by copy {} -> {}", block_id, src, dest);
        let opts = OutputOptions {
            exclusive: self.opts.flags.is_exclusive(),
        };
        self.handler.copy(&src, &dest, opts).await?;
        self.mark_allocated(block_id)?;
        Ok(sectors_to_bytes(self.sectors_per_block()?))
    }
}

#[async_trait]
impl VhdImage for VhdDirectory {
    fn header(&self) -> Result<&Header> {
        self.header.get("header")
    }

    fn footer(&self) -> Result<&Footer> {
        self.footer.get("footer")
    }

    fn contains_block(&self, block_id: u32) -> Result<bool> {
        VhdDirectory::contains_block(self, block_id)
    }

    fn allocated_blocks(&self) -> Result<Vec<u32>> {
        VhdDirectory::allocated_blocks(self)
    }

    async fn read_block(&self, block_id: u32, only_bitmap: bool) -> Result<Block> {
        VhdDirectory::read_block(self, block_id, only_bitmap).await
    }

    async fn write_entire_block(&mut self, block: &Block) -> Result<()> {
        VhdDirectory::write_entire_block(self, block).await
    }

    fn as_directory(&self) -> Option<&VhdDirectory> {
        Some(self)
    }
}
