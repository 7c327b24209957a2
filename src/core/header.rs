//! VHD footer and dynamic-disk header records
//!
//! Both records are big-endian and protected by the classic VHD checksum: the
//! one's complement of the byte sum of the packed record, skipping the
//! checksum field itself. Packing with [`Footer::pack`]/[`Header::pack`]
//! refreshes `checksum` in place so the in-memory record always matches what
//! was last persisted.
//!
//! # Layout
//!
//! ```text
//! Footer (512 bytes)                     Header (1024 bytes)
//!   0  cookie "conectix"                   0  cookie "cxsparse"
//!   8  features                            8  data offset (unused, all ones)
//!  12  file format version                16  table offset
//!  16  data offset                        24  header version
//!  24  timestamp (s since 2000-01-01)     28  max table entries
//!  28  creator application                32  block size
//!  32  creator version                    36  checksum
//!  36  creator host OS                    40  parent uuid
//!  40  original size                      56  parent timestamp
//!  48  current size                       60  reserved
//!  56  geometry (C:u16 H:u8 S:u8)         64  parent unicode name (UTF-16BE)
//!  60  disk type                         576  parent locator entries 8 × 24
//!  64  checksum                          768  reserved
//!  68  unique id
//!  84  saved state
//! ```

use crate::error::{Result, VhdError};
use chrono::{TimeZone, Utc};

pub const SECTOR_SIZE: u32 = 512;
pub const FOOTER_SIZE: usize = 512;
pub const HEADER_SIZE: usize = 1024;

pub const FOOTER_COOKIE: [u8; 8] = *b"conectix";
pub const HEADER_COOKIE: [u8; 8] = *b"cxsparse";
pub const FILE_FORMAT_VERSION: u32 = 0x0001_0000;
pub const HEADER_VERSION: u32 = 0x0001_0000;
pub const DEFAULT_BLOCK_SIZE: u32 = 0x0020_0000;
pub const PARENT_LOCATOR_ENTRIES: usize = 8;

const FOOTER_CHECKSUM_OFFSET: usize = 64;
const HEADER_CHECKSUM_OFFSET: usize = 36;
const PARENT_NAME_SIZE: usize = 512;
const PARENT_LOCATOR_OFFSET: usize = 576;
const PARENT_LOCATOR_SIZE: usize = 24;

/// Seconds between the Unix epoch and the VHD epoch (2000-01-01T00:00:00Z)
const VHD_EPOCH_OFFSET: i64 = 946_684_800;

/// Disk type stored in the footer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskType {
    Fixed,
    Dynamic,
    Differencing,
    Other(u32),
}

impl DiskType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            2 => DiskType::Fixed,
            3 => DiskType::Dynamic,
            4 => DiskType::Differencing,
            other => DiskType::Other(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            DiskType::Fixed => 2,
            DiskType::Dynamic => 3,
            DiskType::Differencing => 4,
            DiskType::Other(v) => *v,
        }
    }
}

/// Platform codes for parent locator entries
pub mod platform {
    pub const NONE: u32 = 0;
    pub const WI2R: u32 = 0x5769_3272;
    pub const WI2K: u32 = 0x5769_326B;
    pub const W2RU: u32 = 0x5732_7275;
    pub const W2KU: u32 = 0x5732_6B75;
    pub const MAC: u32 = 0x4D61_6320;
    pub const MACX: u32 = 0x4D61_6358;
}

/// Cylinder/head/sector geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
}

impl DiskGeometry {
    /// CHS geometry for a disk of `size` bytes, using the VHD format's CHS algorithm
    pub fn for_size(size: u64) -> Self {
        let total_sectors = (size / SECTOR_SIZE as u64).min(65535 * 16 * 255) as u32;
        if total_sectors == 0 {
            return DiskGeometry::default();
        }

        let (spt, heads, cyl_times_heads) = if total_sectors >= 65535 * 16 * 63 {
            (255u32, 16u32, total_sectors / 255)
        } else {
            let mut spt = 17u32;
            let mut cyl_times_heads = total_sectors / spt;
            let mut heads = ((cyl_times_heads + 1023) / 1024).max(4);

            if cyl_times_heads >= heads * 1024 || heads > 16 {
                spt = 31;
                heads = 16;
                cyl_times_heads = total_sectors / spt;
            }
            if cyl_times_heads >= heads * 1024 {
                spt = 63;
                heads = 16;
                cyl_times_heads = total_sectors / spt;
            }
            (spt, heads, cyl_times_heads)
        };

        DiskGeometry {
            cylinders: (cyl_times_heads / heads) as u16,
            heads: heads as u8,
            sectors_per_track: spt as u8,
        }
    }
}

/// Image identity record, present in every VHD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub cookie: [u8; 8],
    pub features: u32,
    pub file_format_version: u32,
    pub data_offset: u64,
    pub timestamp: u32,
    pub creator_application: [u8; 4],
    pub creator_version: u32,
    pub creator_host_os: u32,
    pub original_size: u64,
    pub current_size: u64,
    pub geometry: DiskGeometry,
    pub disk_type: DiskType,
    pub checksum: u32,
    pub uuid: [u8; 16],
    pub saved: u8,
    pub hidden: u8,
    pub reserved: Vec<u8>,
}

impl Footer {
    /// Footer for a new disk of `size` bytes
    pub fn new(size: u64, disk_type: DiskType) -> Self {
        Footer {
            cookie: FOOTER_COOKIE,
            features: 2,
            file_format_version: FILE_FORMAT_VERSION,
            data_offset: FOOTER_SIZE as u64,
            timestamp: vhd_timestamp(Utc::now().timestamp()),
            creator_application: *b"vhdr",
            creator_version: FILE_FORMAT_VERSION,
            creator_host_os: 0x5769_326B,
            original_size: size,
            current_size: size,
            geometry: DiskGeometry::for_size(size),
            disk_type,
            checksum: 0,
            uuid: *uuid::Uuid::new_v4().as_bytes(),
            saved: 0,
            hidden: 0,
            reserved: vec![0; FOOTER_SIZE - 86],
        }
    }

    /// Serialize to the 512-byte record and refresh `checksum`
    pub fn pack(&mut self) -> Vec<u8> {
        let mut buf = vec![0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.cookie);
        put_u32(&mut buf, 8, self.features);
        put_u32(&mut buf, 12, self.file_format_version);
        put_u64(&mut buf, 16, self.data_offset);
        put_u32(&mut buf, 24, self.timestamp);
        buf[28..32].copy_from_slice(&self.creator_application);
        put_u32(&mut buf, 32, self.creator_version);
        put_u32(&mut buf, 36, self.creator_host_os);
        put_u64(&mut buf, 40, self.original_size);
        put_u64(&mut buf, 48, self.current_size);
        buf[56..58].copy_from_slice(&self.geometry.cylinders.to_be_bytes());
        buf[58] = self.geometry.heads;
        buf[59] = self.geometry.sectors_per_track;
        put_u32(&mut buf, 60, self.disk_type.as_u32());
        buf[68..84].copy_from_slice(&self.uuid);
        buf[84] = self.saved;
        buf[85] = self.hidden;
        let n = self.reserved.len().min(FOOTER_SIZE - 86);
        buf[86..86 + n].copy_from_slice(&self.reserved[..n]);

        self.checksum = checksum(&buf, FOOTER_CHECKSUM_OFFSET);
        put_u32(&mut buf, FOOTER_CHECKSUM_OFFSET, self.checksum);
        buf
    }

    /// Parse and validate a packed footer
    pub fn unpack(buf: &[u8]) -> Result<Self> {
        if buf.len() < FOOTER_SIZE {
            return Err(VhdError::InvalidLength {
                what: "footer",
                expected: FOOTER_SIZE,
                actual: buf.len(),
            });
        }
        let buf = &buf[..FOOTER_SIZE];

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&buf[0..8]);
        if cookie != FOOTER_COOKIE {
            return Err(VhdError::InvalidCookie {
                what: "footer",
                found: String::from_utf8_lossy(&cookie).into_owned(),
            });
        }
        verify_checksum("footer", buf, FOOTER_CHECKSUM_OFFSET)?;

        let mut creator_application = [0u8; 4];
        creator_application.copy_from_slice(&buf[28..32]);
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[68..84]);

        Ok(Footer {
            cookie,
            features: get_u32(buf, 8),
            file_format_version: get_u32(buf, 12),
            data_offset: get_u64(buf, 16),
            timestamp: get_u32(buf, 24),
            creator_application,
            creator_version: get_u32(buf, 32),
            creator_host_os: get_u32(buf, 36),
            original_size: get_u64(buf, 40),
            current_size: get_u64(buf, 48),
            geometry: DiskGeometry {
                cylinders: u16::from_be_bytes([buf[56], buf[57]]),
                heads: buf[58],
                sectors_per_track: buf[59],
            },
            disk_type: DiskType::from_u32(get_u32(buf, 60)),
            checksum: get_u32(buf, FOOTER_CHECKSUM_OFFSET),
            uuid,
            saved: buf[84],
            hidden: buf[85],
            reserved: buf[86..].to_vec(),
        })
    }
}

/// One of the eight parent locator slots of a header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParentLocatorEntry {
    pub platform_code: u32,
    pub platform_data_space: u32,
    pub platform_data_length: u32,
    pub reserved: u32,
    pub platform_data_offset: u64,
}

/// Dynamic/differencing disk header: block geometry and parent linkage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub cookie: [u8; 8],
    pub data_offset: u64,
    pub table_offset: u64,
    pub header_version: u32,
    pub max_table_entries: u32,
    pub block_size: u32,
    pub checksum: u32,
    pub parent_uuid: [u8; 16],
    pub parent_timestamp: u32,
    pub reserved1: u32,
    pub parent_unicode_name: Vec<u8>,
    pub parent_locator_entry: [ParentLocatorEntry; PARENT_LOCATOR_ENTRIES],
    pub reserved2: Vec<u8>,
}

impl Header {
    /// Header for a new dynamic disk with `max_table_entries` blocks of `block_size` bytes
    pub fn new(max_table_entries: u32, block_size: u32) -> Self {
        Header {
            cookie: HEADER_COOKIE,
            data_offset: u64::MAX,
            table_offset: (FOOTER_SIZE + HEADER_SIZE) as u64,
            header_version: HEADER_VERSION,
            max_table_entries,
            block_size,
            checksum: 0,
            parent_uuid: [0; 16],
            parent_timestamp: 0,
            reserved1: 0,
            parent_unicode_name: vec![0; PARENT_NAME_SIZE],
            parent_locator_entry: [ParentLocatorEntry::default(); PARENT_LOCATOR_ENTRIES],
            reserved2: vec![0; HEADER_SIZE - 768],
        }
    }

    /// Parent file name, decoded from UTF-16BE with trailing NULs dropped
    pub fn parent_name(&self) -> String {
        let units: Vec<u16> = self
            .parent_unicode_name
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .take_while(|&u| u != 0)
            .collect();
        String::from_utf16_lossy(&units)
    }

    /// Store a parent file name as UTF-16BE; longer names are truncated to the field
    pub fn set_parent_name(&mut self, name: &str) {
        let mut field = vec![0u8; PARENT_NAME_SIZE];
        for (i, unit) in name.encode_utf16().take(PARENT_NAME_SIZE / 2).enumerate() {
            field[i * 2..i * 2 + 2].copy_from_slice(&unit.to_be_bytes());
        }
        self.parent_unicode_name = field;
    }

    /// Serialize to the 1024-byte record and refresh `checksum`
    pub fn pack(&mut self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.cookie);
        put_u64(&mut buf, 8, self.data_offset);
        put_u64(&mut buf, 16, self.table_offset);
        put_u32(&mut buf, 24, self.header_version);
        put_u32(&mut buf, 28, self.max_table_entries);
        put_u32(&mut buf, 32, self.block_size);
        buf[40..56].copy_from_slice(&self.parent_uuid);
        put_u32(&mut buf, 56, self.parent_timestamp);
        put_u32(&mut buf, 60, self.reserved1);
        let n = self.parent_unicode_name.len().min(PARENT_NAME_SIZE);
        buf[64..64 + n].copy_from_slice(&self.parent_unicode_name[..n]);

        for (i, entry) in self.parent_locator_entry.iter().enumerate() {
            let at = PARENT_LOCATOR_OFFSET + i * PARENT_LOCATOR_SIZE;
            put_u32(&mut buf, at, entry.platform_code);
            put_u32(&mut buf, at + 4, entry.platform_data_space);
            put_u32(&mut buf, at + 8, entry.platform_data_length);
            put_u32(&mut buf, at + 12, entry.reserved);
            put_u64(&mut buf, at + 16, entry.platform_data_offset);
        }

        let n = self.reserved2.len().min(HEADER_SIZE - 768);
        buf[768..768 + n].copy_from_slice(&self.reserved2[..n]);

        self.checksum = checksum(&buf, HEADER_CHECKSUM_OFFSET);
        put_u32(&mut buf, HEADER_CHECKSUM_OFFSET, self.checksum);
        buf
    }

    /// Parse and validate a packed header against its footer
    pub fn unpack(buf: &[u8], footer: &Footer) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(VhdError::InvalidLength {
                what: "header",
                expected: HEADER_SIZE,
                actual: buf.len(),
            });
        }
        let buf = &buf[..HEADER_SIZE];

        let mut cookie = [0u8; 8];
        cookie.copy_from_slice(&buf[0..8]);
        if cookie != HEADER_COOKIE {
            return Err(VhdError::InvalidCookie {
                what: "header",
                found: String::from_utf8_lossy(&cookie).into_owned(),
            });
        }
        verify_checksum("header", buf, HEADER_CHECKSUM_OFFSET)?;

        let header_version = get_u32(buf, 24);
        if header_version != HEADER_VERSION {
            return Err(VhdError::UnsupportedVersion {
                what: "header",
                version: header_version,
            });
        }

        let block_size = get_u32(buf, 32);
        let sectors = block_size / SECTOR_SIZE;
        if block_size % SECTOR_SIZE != 0 || !sectors.is_power_of_two() {
            return Err(VhdError::InvalidGeometry(format!(
                "block size {} is not a power-of-two number of sectors",
                block_size
            )));
        }

        let max_table_entries = get_u32(buf, 28);
        let needed = footer.current_size.div_ceil(block_size as u64);
        if (max_table_entries as u64) < needed {
            return Err(VhdError::InvalidGeometry(format!(
                "{} table entries cannot address {} bytes with {} byte blocks",
                max_table_entries, footer.current_size, block_size
            )));
        }

        let mut parent_uuid = [0u8; 16];
        parent_uuid.copy_from_slice(&buf[40..56]);

        let mut parent_locator_entry = [ParentLocatorEntry::default(); PARENT_LOCATOR_ENTRIES];
        for (i, entry) in parent_locator_entry.iter_mut().enumerate() {
            let at = PARENT_LOCATOR_OFFSET + i * PARENT_LOCATOR_SIZE;
            *entry = ParentLocatorEntry {
                platform_code: get_u32(buf, at),
                platform_data_space: get_u32(buf, at + 4),
                platform_data_length: get_u32(buf, at + 8),
                reserved: get_u32(buf, at + 12),
                platform_data_offset: get_u64(buf, at + 16),
            };
        }

        Ok(Header {
            cookie,
            data_offset: get_u64(buf, 8),
            table_offset: get_u64(buf, 16),
            header_version,
            max_table_entries,
            block_size,
            checksum: get_u32(buf, HEADER_CHECKSUM_OFFSET),
            parent_uuid,
            parent_timestamp: get_u32(buf, 56),
            reserved1: get_u32(buf, 60),
            parent_unicode_name: buf[64..64 + PARENT_NAME_SIZE].to_vec(),
            parent_locator_entry,
            reserved2: buf[768..].to_vec(),
        })
    }
}

/// One's complement of the byte sum, skipping the 4-byte checksum field at `field`
pub fn checksum(buf: &[u8], field: usize) -> u32 {
    let sum = buf
        .iter()
        .enumerate()
        .filter(|(i, _)| !(field..field + 4).contains(i))
        .fold(0u32, |acc, (_, &b)| acc.wrapping_add(b as u32));
    !sum
}

fn verify_checksum(what: &'static str, buf: &[u8], field: usize) -> Result<()> {
    let stored = get_u32(buf, field);
    let computed = checksum(buf, field);
    if stored != computed {
        return Err(VhdError::ChecksumMismatch {
            what,
            stored,
            computed,
        });
    }
    Ok(())
}

/// Convert Unix seconds to VHD-epoch seconds, clamping before 2000 to zero
pub fn vhd_timestamp(unix_secs: i64) -> u32 {
    (unix_secs - VHD_EPOCH_OFFSET).clamp(0, u32::MAX as i64) as u32
}

/// Convert a VHD-epoch timestamp back to a UTC datetime
pub fn timestamp_to_datetime(timestamp: u32) -> Option<chrono::DateTime<Utc>> {
    Utc.timestamp_opt(VHD_EPOCH_OFFSET + timestamp as i64, 0).single()
}

pub fn sectors_to_bytes(sectors: u32) -> u64 {
    sectors as u64 * SECTOR_SIZE as u64
}

/// Whole sectors needed for `bytes`, never less than one
pub fn sectors_round_up_no_zero(bytes: u32) -> u32 {
    bytes.div_ceil(SECTOR_SIZE).max(1)
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(bytes)
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_be_bytes());
}
