//! Backend-independent image abstraction
//!
//! [`VhdImage`] is what the coalesce engine needs from an image. Backends
//! with a faster way to merge blocks (see
//! [`VhdDirectory::coalesce_block`](crate::VhdDirectory::coalesce_block))
//! check for it at call time and otherwise fall back to
//! [`coalesce_block_generic`].

use crate::directory::VhdDirectory;
use crate::error::{Result, VhdError};
use crate::header::{
    sectors_round_up_no_zero, sectors_to_bytes, DiskType, Footer, Header, PARENT_LOCATOR_ENTRIES,
    SECTOR_SIZE,
};
use async_trait::async_trait;

/// One allocation unit: sector bitmap followed by block data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: u32,
    bitmap_size: usize,
    /// Bitmap and data, exactly as stored
    pub buffer: Vec<u8>,
}

impl Block {
    pub fn new(id: u32, bitmap_size: usize, buffer: Vec<u8>) -> Self {
        Block {
            id,
            bitmap_size,
            buffer,
        }
    }

    /// Build a block from separate bitmap and data parts
    pub fn from_parts(id: u32, bitmap: &[u8], data: &[u8]) -> Self {
        let mut buffer = Vec::with_capacity(bitmap.len() + data.len());
        buffer.extend_from_slice(bitmap);
        buffer.extend_from_slice(data);
        Block::new(id, bitmap.len(), buffer)
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.buffer[..self.bitmap_size.min(self.buffer.len())]
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer[self.bitmap_size.min(self.buffer.len())..]
    }
}

/// Content of a parent locator slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLocator {
    pub id: u32,
    pub platform_code: u32,
    pub data: Vec<u8>,
}

pub(crate) fn check_locator_id(id: u32) -> Result<usize> {
    if id as usize >= PARENT_LOCATOR_ENTRIES {
        return Err(VhdError::InvalidParentLocator(id));
    }
    Ok(id as usize)
}

/// Locator payload length as stored in the 32-bit header field
pub(crate) fn locator_data_length(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| VhdError::InvalidLength {
        what: "parent locator data",
        expected: u32::MAX as usize,
        actual: len,
    })
}

/// A coalesce-capable image
#[async_trait]
pub trait VhdImage: Send + Sync {
    fn header(&self) -> Result<&Header>;

    fn footer(&self) -> Result<&Footer>;

    fn contains_block(&self, block_id: u32) -> Result<bool>;

    /// Ids of every allocated block, ascending
    fn allocated_blocks(&self) -> Result<Vec<u32>>;

    async fn read_block(&self, block_id: u32, only_bitmap: bool) -> Result<Block>;

    async fn write_entire_block(&mut self, block: &Block) -> Result<()>;

    /// Downcast hook for backends that coalesce faster between their own kind
    fn as_directory(&self) -> Option<&VhdDirectory> {
        None
    }

    fn sectors_per_block(&self) -> Result<u32> {
        Ok(self.header()?.block_size / SECTOR_SIZE)
    }

    /// Bytes of sector bitmap in front of each block, whole sectors
    fn bitmap_size(&self) -> Result<usize> {
        let sectors = sectors_round_up_no_zero(self.sectors_per_block()? >> 3);
        Ok(sectors_to_bytes(sectors) as usize)
    }

    fn full_block_size(&self) -> Result<usize> {
        Ok(self.bitmap_size()? + self.header()?.block_size as usize)
    }

    fn is_differencing(&self) -> Result<bool> {
        Ok(self.footer()?.disk_type == DiskType::Differencing)
    }

    /// True when every block present in `child` is also present here
    fn contains_all_data_of(&self, child: &dyn VhdImage) -> Result<bool> {
        for id in child.allocated_blocks()? {
            if !self.contains_block(id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Merge one block by decoding it from `child` and writing it whole into `parent`
///
/// Returns the number of data bytes moved.
pub async fn coalesce_block_generic<P>(
    parent: &mut P,
    child: &dyn VhdImage,
    block_id: u32,
) -> Result<u64>
where
    P: VhdImage + ?Sized,
{
    let block = child.read_block(block_id, false).await?;
    parent.write_entire_block(&block).await?;
    Ok(block.data().len() as u64)
}
