//! Parent locators of differencing images

mod common;

use common::BLOCK_SIZE;
use std::sync::Arc;
use vhdir::{
    platform, DiskType, Footer, Header, MemoryHandler, ParentLocator, StorageHandler,
    VhdDirectory, VhdDirectoryOptions, VhdError, VhdImage,
};

async fn differencing_image(handler: Arc<dyn StorageHandler>, path: &str) -> VhdDirectory {
    let mut vhd = VhdDirectory::create(handler, path, VhdDirectoryOptions::create())
        .await
        .unwrap();
    vhd.set_footer(Footer::new(8 * BLOCK_SIZE as u64, DiskType::Differencing));
    let mut header = Header::new(8, BLOCK_SIZE);
    header.set_parent_name("parent.vhd");
    for entry in header.parent_locator_entry.iter_mut() {
        entry.platform_data_offset = 0x1000;
    }
    vhd.set_header(header);
    vhd
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

#[tokio::test]
async fn test_unique_parent_locator() {
    let memory = Arc::new(MemoryHandler::new());
    let mut vhd = differencing_image(memory.clone(), "child").await;

    vhd.set_unique_parent_locator("parent.vhd").await.unwrap();

    let header = vhd.header().unwrap();
    let first = &header.parent_locator_entry[0];
    assert_eq!(first.platform_code, platform::W2KU);
    assert_eq!(first.platform_data_length, 20);
    for entry in &header.parent_locator_entry[1..] {
        assert_eq!(entry.platform_code, platform::NONE);
        assert_eq!(entry.platform_data_length, 0);
    }
    assert!(header
        .parent_locator_entry
        .iter()
        .all(|entry| entry.platform_data_offset == 0));

    assert_eq!(
        memory.read_file("child/parentLocatorEntry0").await.unwrap(),
        utf16le("parent.vhd")
    );
    for id in 1..8 {
        let path = format!("child/parentLocatorEntry{}", id);
        assert!(memory.read_file(&path).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_locator_survives_reopen() {
    let handler: Arc<dyn StorageHandler> = Arc::new(MemoryHandler::new());
    let mut vhd = differencing_image(handler.clone(), "child").await;
    vhd.set_unique_parent_locator("parent.vhd").await.unwrap();
    vhd.write_footer().await.unwrap();
    vhd.write_header().await.unwrap();
    vhd.write_block_allocation_table().await.unwrap();

    let vhd = VhdDirectory::open(handler, "child", VhdDirectoryOptions::read_only())
        .await
        .unwrap();
    assert!(vhd.is_differencing().unwrap());
    assert_eq!(vhd.header().unwrap().parent_name(), "parent.vhd");

    let locator = vhd.read_parent_locator(0).await.unwrap();
    assert_eq!(locator.platform_code, platform::W2KU);
    let units: Vec<u16> = locator
        .data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(String::from_utf16(&units).unwrap(), "parent.vhd");

    let empty = vhd.read_parent_locator(3).await.unwrap();
    assert_eq!(empty.platform_code, platform::NONE);
    assert!(empty.data.is_empty());
}

#[tokio::test]
async fn test_write_single_locator() {
    let memory = Arc::new(MemoryHandler::new());
    let mut vhd = differencing_image(memory.clone(), "child").await;

    let data = b"/mnt/parent.vhd".to_vec();
    vhd.write_parent_locator(&ParentLocator {
        id: 2,
        platform_code: platform::MACX,
        data: data.clone(),
    })
    .await
    .unwrap();

    let entry = &vhd.header().unwrap().parent_locator_entry[2];
    assert_eq!(entry.platform_code, platform::MACX);
    assert_eq!(entry.platform_data_length, data.len() as u32);
    assert_eq!(entry.platform_data_offset, 0);
    // untouched slots keep their offsets
    assert_eq!(
        vhd.header().unwrap().parent_locator_entry[1].platform_data_offset,
        0x1000
    );
    assert_eq!(vhd.read_parent_locator_data(2).await.unwrap(), data);
}

#[tokio::test]
async fn test_locator_id_out_of_range() {
    let memory = Arc::new(MemoryHandler::new());
    let mut vhd = differencing_image(memory.clone(), "child").await;

    assert!(matches!(
        vhd.read_parent_locator(8).await,
        Err(VhdError::InvalidParentLocator(8))
    ));
    assert!(matches!(
        vhd.write_parent_locator_data(9, b"x").await,
        Err(VhdError::InvalidParentLocator(9))
    ));
    assert!(!memory.contains("child/parentLocatorEntry9"));
}
