//! Cells, builders, slices, dictionaries and bag-of-cells serialization for TON

pub mod cli;
pub mod crc;
pub mod tvm;
pub mod utils;
