//! Property-based tests for block allocation

mod common;

use common::create_image;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::runtime::Runtime;
use vhdir::{Block, MemoryHandler, StorageHandler, VhdImage};

const MAX_BLOCKS: u32 = 2500;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_written_blocks_are_contained(
        ids in prop::collection::btree_set(0u32..MAX_BLOCKS, 0..24)
    ) {
        let rt = runtime();
        let (allocated, probes) = rt.block_on(async {
            let handler: Arc<dyn StorageHandler> = Arc::new(MemoryHandler::new());
            let mut vhd = create_image(handler, "img", None, MAX_BLOCKS).await;
            let bitmap_size = vhd.bitmap_size().unwrap();
            for &id in &ids {
                let block = Block::new(id, bitmap_size, vec![0xA5; bitmap_size + 16]);
                vhd.write_entire_block(&block).await.unwrap();
            }
            let probes: Vec<(u32, bool)> = (0..MAX_BLOCKS)
                .step_by(7)
                .chain(ids.iter().copied())
                .map(|id| (id, vhd.contains_block(id).unwrap()))
                .collect();
            (vhd.allocated_blocks().unwrap(), probes)
        });

        prop_assert_eq!(allocated, ids.iter().copied().collect::<Vec<_>>());
        for (id, present) in probes {
            prop_assert_eq!(present, ids.contains(&id));
        }
    }

    #[test]
    fn prop_block_round_trips_through_chunk(
        id in 0u32..MAX_BLOCKS,
        data_len in 0usize..4096,
        fill in any::<u8>()
    ) {
        let rt = runtime();
        let (bitmap_size, read) = rt.block_on(async {
            let handler: Arc<dyn StorageHandler> = Arc::new(MemoryHandler::new());
            let mut vhd = create_image(handler, "img", None, MAX_BLOCKS).await;
            let bitmap_size = vhd.bitmap_size().unwrap();
            let block = Block::new(id, bitmap_size, vec![fill; bitmap_size + data_len]);
            vhd.write_entire_block(&block).await.unwrap();
            (bitmap_size, vhd.read_block(id, false).await.unwrap())
        });

        prop_assert_eq!(read.id, id);
        prop_assert_eq!(read.bitmap().len(), bitmap_size);
        prop_assert_eq!(read.data().len(), data_len);
        prop_assert!(read.buffer.iter().all(|&b| b == fill));
    }
}

#[test]
fn test_unwritten_ids_are_absent() {
    let ids: BTreeSet<u32> = [1, 999, 1000, 2499].into_iter().collect();
    let rt = runtime();
    rt.block_on(async {
        let handler: Arc<dyn StorageHandler> = Arc::new(MemoryHandler::new());
        let mut vhd = create_image(handler.clone(), "img", None, MAX_BLOCKS).await;
        let bitmap_size = vhd.bitmap_size().unwrap();
        for &id in &ids {
            let block = Block::new(id, bitmap_size, vec![0; bitmap_size]);
            vhd.write_entire_block(&block).await.unwrap();
        }
        for id in [0, 2, 998, 1001, 2498] {
            assert!(!vhd.contains_block(id).unwrap());
        }
        assert!(handler.read_file("img/blocks/1/0").await.is_ok());
        assert!(handler.read_file("img/blocks/2/499").await.is_ok());
    });
}
