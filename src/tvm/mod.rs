//! TVM (TON Virtual Machine) data structures and utilities
//!
//! This module provides implementations of fundamental TON blockchain data structures:
//! - Cell: The basic data structure that can store up to 1023 bits and up to 4 references
//! - Builder: A bounded writer that freezes into a Cell
//! - Slice: A reader for sequentially accessing cell data
//! - Dict: Hashmap / HashmapE dictionaries with fixed-width keys
//! - BoC: Bag of Cells serialization format for encoding cell graphs into byte arrays
//! - Fift: Indented hex text form of cell trees
//! - Address: TON internal address handling

pub mod address;
pub mod bits;
pub mod boc;
pub mod builder;
pub mod cell;
pub mod dict;
pub mod error;
pub mod fift;
pub mod slice;
#[cfg(test)]
pub mod tests;

pub use address::Address;
pub use boc::{
    BocOptions, TopologicalOrder, base64_to_boc, boc_to_base64, boc_to_hex, deserialize_boc,
    deserialize_boc_roots, hex_to_boc, parse_boc_any, serialize_boc,
};
pub use builder::Builder;
pub use cell::{Cell, MAX_CELL_BITS, MAX_CELL_LEVEL, MAX_CELL_REFS};
pub use dict::{DictKey, Hashmap, HashmapE};
pub use error::{CellError, Result};
pub use slice::Slice;
