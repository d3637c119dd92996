//! Integration tests across cells, builders, slices, dictionaries and BoC

use crate::tvm::*;
use num_bigint::BigUint;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn bits_of(s: &str) -> Vec<bool> {
    s.chars().map(|c| c == '1').collect()
}

/// Builds a random cell graph where later cells reuse earlier ones as children
fn random_graph(rng: &mut StdRng, cells: usize) -> Arc<Cell> {
    let mut pool: Vec<Arc<Cell>> = Vec::new();
    for _ in 0..cells {
        let mut builder = Builder::new();
        let bits: Vec<bool> = (0..rng.gen_range(0..300)).map(|_| rng.gen_bool(0.5)).collect();
        builder.store_bit_slice(&bits).unwrap();

        if !pool.is_empty() {
            for _ in 0..rng.gen_range(0..=MAX_CELL_REFS) {
                let child = pool[rng.gen_range(0..pool.len())].clone();
                builder.store_ref(child).unwrap();
            }
        }
        pool.push(builder.build().unwrap());
    }

    let mut root = Builder::new();
    root.store_u32(0xC0FFEE).unwrap();
    for child in pool.iter().rev().take(MAX_CELL_REFS) {
        root.store_ref(child.clone()).unwrap();
    }
    root.build().unwrap()
}

/// A cell with bits 1001 hashes to a fixed value
#[test]
fn test_golden_hash_1001() {
    let mut builder = Builder::new();
    builder.store_bit_slice(&bits_of("1001")).unwrap();
    let cell = builder.build().unwrap();

    assert_eq!(cell.descriptors(), [0x00, 0x01]);
    assert_eq!(
        cell.hash_hex(),
        "eca7aadd1d8706a654ffbf512b96ff80f680ed508186774e01edf7e6f85cde90"
    );
}

/// A 9-bit single cell survives a default BoC round trip
#[test]
fn test_nine_bit_boc_scenario() {
    let mut builder = Builder::new();
    builder.store_bit_slice(&bits_of("101100111")).unwrap();
    let cell = builder.build().unwrap();

    let boc = serialize_boc(&cell, &BocOptions::default()).unwrap();
    let decoded = deserialize_boc(&boc).unwrap();
    assert_eq!(decoded.bit_len(), 9);
    assert_eq!(decoded.bits(), bits_of("101100111"));
}

/// Zero coins are a bare 4-bit zero length
#[test]
fn test_zero_coins_scenario() {
    let mut builder = Builder::new();
    builder.store_coins(0u32).unwrap();
    let cell = builder.build().unwrap();
    assert_eq!(cell.bit_len(), 4);
    assert_eq!(cell.bits(), bits_of("0000"));

    let mut slice = cell.parse();
    assert_eq!(slice.load_coins().unwrap().to_string(), "0");
    assert!(slice.is_empty());
}

/// Independently built equal trees hash equally
#[test]
fn test_hash_stability() {
    let build = || {
        let mut leaf = Builder::new();
        leaf.store_string("leaf").unwrap();
        let leaf = leaf.build().unwrap();

        let mut root = Builder::new();
        root.store_uint(77, 7).unwrap();
        root.store_ref(leaf.clone()).unwrap();
        root.store_ref(leaf).unwrap();
        root.build().unwrap()
    };

    let a = build();
    let b = build();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(a.hash(), b.hash());
    assert_eq!(a, b);
}

/// Filling a builder exactly to its limits succeeds, one more fails
#[test]
fn test_builder_limits() {
    let mut builder = Builder::new();
    builder.store_bit_slice(&vec![true; MAX_CELL_BITS]).unwrap();
    for _ in 0..MAX_CELL_REFS {
        builder.store_ref(Arc::new(Cell::new())).unwrap();
    }

    assert!(matches!(builder.store_bit(false), Err(CellError::Capacity(_))));
    assert!(matches!(
        builder.store_ref(Arc::new(Cell::new())),
        Err(CellError::Capacity(_))
    ));

    let cell = builder.build().unwrap();
    assert_eq!(cell.bit_len(), MAX_CELL_BITS);
    assert_eq!(cell.reference_count(), MAX_CELL_REFS);
}

/// A frozen cell never sees later builder writes
#[test]
fn test_builder_freeze() {
    let mut builder = Builder::new();
    builder.store_byte(0x11).unwrap();
    let first = builder.build().unwrap();

    builder.store_byte(0x22).unwrap();
    let second = builder.build().unwrap();

    assert_eq!(first.data(), &[0x11]);
    assert_eq!(second.data(), &[0x11, 0x22]);
}

/// A message-like structure with an address, coins and a dictionary
#[test]
fn test_structured_round_trip() {
    let owner = Address::from_raw(
        "0:83dfd552e63729b472fcbcc8c45ebcc6691702558b68ec7527e1ba403a0f31a8",
    )
    .unwrap();

    let mut balances = HashmapE::new(Address::STD_BITS);
    for (i, seed) in [3u8, 9, 27].into_iter().enumerate() {
        let mut value = Builder::new();
        value.store_coins(1_000_000_000u64 * (i as u64 + 1)).unwrap();
        balances
            .set(Address::new(0, [seed; 32]), value.build().unwrap())
            .unwrap();
    }

    let mut body = Builder::new();
    body.store_string("transfer").unwrap();
    let body = body.build().unwrap();

    let mut root = Builder::new();
    root.store_u32(0x0f8a7ea5).unwrap();
    root.store_u64(42).unwrap();
    root.store_coins(BigUint::from(5u32) * BigUint::from(10u64.pow(18))).unwrap();
    root.store_address(Some(&owner)).unwrap();
    root.store_address(None).unwrap();
    root.store_dict(&balances).unwrap();
    root.store_maybe_ref(Some(body.clone())).unwrap();
    let root = root.build().unwrap();

    let boc = boc_to_base64(&root, &BocOptions::default()).unwrap();
    let decoded = base64_to_boc(&boc).unwrap();
    assert_eq!(decoded.hash(), root.hash());

    let mut slice = decoded.parse();
    assert_eq!(slice.load_u32().unwrap(), 0x0f8a7ea5);
    assert_eq!(slice.load_u64().unwrap(), 42);
    assert_eq!(
        slice.load_coins().unwrap(),
        BigUint::from(5u32) * BigUint::from(10u64.pow(18))
    );
    assert_eq!(slice.load_address().unwrap(), Some(owner));
    assert_eq!(slice.load_address().unwrap(), None);

    let loaded = slice.load_dict(Address::STD_BITS).unwrap();
    assert_eq!(loaded, balances);
    let value = loaded.get(Address::new(0, [9u8; 32])).unwrap().unwrap();
    assert_eq!(
        value.parse().load_coins().unwrap(),
        BigUint::from(2_000_000_000u64)
    );

    let body_ref = slice.load_maybe_ref().unwrap().unwrap();
    assert_eq!(body_ref.parse().load_string(None).unwrap(), "transfer");
    assert!(slice.is_empty());
}

/// Fift text, binary BoC and the printed tree agree on the same graph
#[test]
fn test_fift_and_boc_agree() {
    let fift = "x{C8}\n x{62_}\n  x{6E_}\n   x{500A9}\n   x{400AA}\n  x{A08090C_}\n x{BEFDF21}";
    let root = parse_boc_any(fift).unwrap().remove(0);

    for order in [TopologicalOrder::BreadthFirst, TopologicalOrder::DepthFirst] {
        let options = BocOptions {
            has_index: true,
            topological_order: order,
            ..BocOptions::default()
        };
        let hex = boc_to_hex(&root, &options).unwrap();
        let decoded = hex_to_boc(&hex).unwrap();
        assert_eq!(
            decoded.hash_hex(),
            "92f18ee3a6c7082d33a25b704a7e9fa06200d9541517c450733d1b8eb4d3dce4"
        );
        assert_eq!(decoded.to_fift_hex().trim_end(), fift);
    }
}

/// Random shared graphs round trip under every option combination
#[test]
fn test_random_graph_round_trips() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10 {
        let cells = rng.gen_range(1..40);
        let root = random_graph(&mut rng, cells);

        for bits in 0..8u8 {
            for order in [TopologicalOrder::BreadthFirst, TopologicalOrder::DepthFirst] {
                let options = BocOptions {
                    has_index: bits & 1 != 0,
                    has_crc32: bits & 2 != 0,
                    has_cache_bits: bits & 4 != 0,
                    flags: 0,
                    topological_order: order,
                };
                let boc = serialize_boc(&root, &options).unwrap();
                assert_eq!(deserialize_boc(&boc).unwrap().hash(), root.hash());
            }
        }
    }
}

/// Deep chains are handled without recursion
#[test]
fn test_deep_chain() {
    let mut cell = Arc::new(Cell::new());
    for i in 0..2000u32 {
        let mut builder = Builder::new();
        builder.store_u32(i).unwrap();
        builder.store_ref(cell).unwrap();
        cell = builder.build().unwrap();
    }
    assert_eq!(cell.depth(), 2000);

    let boc = serialize_boc(&cell, &BocOptions::default()).unwrap();
    let decoded = deserialize_boc(&boc).unwrap();
    assert_eq!(decoded.hash(), cell.hash());
    assert_eq!(decoded.to_fift_hex().lines().count(), 2001);
}

/// Frozen cells can be shared across threads
#[test]
fn test_cells_are_shareable() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Cell>();
    assert_send_sync::<Arc<Cell>>();

    let mut builder = Builder::new();
    builder.store_u64(0xFEED).unwrap();
    let cell = builder.build().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cell = cell.clone();
            std::thread::spawn(move || cell.parse().load_u64().unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 0xFEED);
    }
}
