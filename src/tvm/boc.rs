//! Bag of Cells (BoC) serialization and deserialization
//!
//! BoC is a serialization format that encodes a whole cell graph into one byte
//! array. Structurally identical subtrees are stored once, and every cell is
//! written before the cells it references, so child indices always point forward.
//!
//! Layout (big-endian unless noted):
//!
//! ```text
//! magic(4) flags|size_bytes(1) offset_bytes(1)
//! cells_num roots_num absent_num (size_bytes each) tot_cells_size (offset_bytes)
//! root_list (roots_num * size_bytes)
//! [index (cells_num * offset_bytes)]
//! cell records (tot_cells_size)
//! [crc32c (4, little-endian)]
//! ```

use crate::crc::CRC32C;
use crate::tvm::bits;
use crate::tvm::cell::{Cell, MAX_CELL_REFS};
use crate::tvm::error::{Result, format_err, range, topology};
use crate::tvm::fift;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Arc;

/// BoC magic number for the generic format
const BOC_GENERIC_MAGIC: u32 = 0xb5ee9c72;

/// BoC magic number for the lean indexed format
const BOC_INDEXED_MAGIC: u32 = 0x68ff65f3;

/// BoC magic number for the lean indexed format with CRC32C
const BOC_INDEXED_CRC32C_MAGIC: u32 = 0xacc3a728;

/// Most roots a single BoC may declare
pub const MAX_BOC_ROOTS: usize = 4;

/// Order in which cells are laid out in the serialized bag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopologicalOrder {
    /// Level by level from the root
    #[default]
    BreadthFirst,
    /// Each subtree before its right siblings
    DepthFirst,
}

/// Options controlling the generic BoC header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BocOptions {
    /// Write the per-cell offset index
    pub has_index: bool,
    /// Append a CRC32C checksum
    pub has_crc32: bool,
    /// Reserve a cache bit in every index entry
    pub has_cache_bits: bool,
    /// Two reserved user flag bits
    pub flags: u8,
    /// Cell ordering strategy
    pub topological_order: TopologicalOrder,
}

impl Default for BocOptions {
    fn default() -> Self {
        Self {
            has_index: false,
            has_crc32: true,
            has_cache_bits: false,
            flags: 0,
            topological_order: TopologicalOrder::BreadthFirst,
        }
    }
}

impl BocOptions {
    /// Parses options from JSON; missing fields take their default values
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| format_err!("Invalid BoC options: {}", e))
    }
}

/// Unique cells of a graph with child links as arena indices
struct CellArena {
    cells: Vec<Arc<Cell>>,
    children: Vec<Vec<usize>>,
}

impl CellArena {
    /// Collects every distinct cell reachable from `root`, deduplicated by hash
    fn collect(root: &Arc<Cell>) -> Self {
        let mut index: HashMap<[u8; 32], usize> = HashMap::new();
        let mut cells = vec![root.clone()];
        let mut children = Vec::new();
        index.insert(root.hash(), 0);

        let mut next = 0;
        while next < cells.len() {
            let cell = cells[next].clone();
            let mut refs = Vec::with_capacity(cell.reference_count());
            for reference in cell.references() {
                let id = *index.entry(reference.hash()).or_insert_with(|| {
                    cells.push(reference.clone());
                    cells.len() - 1
                });
                refs.push(id);
            }
            children.push(refs);
            next += 1;
        }

        Self { cells, children }
    }

    /// Orders the arena so that every cell precedes all cells it references
    ///
    /// Kahn's algorithm: a cell becomes ready once every reference to it has
    /// been emitted. A queue of ready cells gives breadth-first order, a stack
    /// gives depth-first order.
    fn sort(&self, order: TopologicalOrder) -> Result<Vec<usize>> {
        let mut in_degree = vec![0usize; self.cells.len()];
        for refs in &self.children {
            for &child in refs {
                in_degree[child] += 1;
            }
        }

        let mut sorted = Vec::with_capacity(self.cells.len());
        let mut ready = VecDeque::from([0usize]);

        loop {
            let next = match order {
                TopologicalOrder::BreadthFirst => ready.pop_front(),
                TopologicalOrder::DepthFirst => ready.pop_back(),
            };
            let Some(id) = next else { break };
            sorted.push(id);

            let refs = &self.children[id];
            let mut release = |child: usize| {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push_back(child);
                }
            };
            match order {
                TopologicalOrder::BreadthFirst => refs.iter().copied().for_each(&mut release),
                // reversed so that the first child is popped first
                TopologicalOrder::DepthFirst => refs.iter().rev().copied().for_each(&mut release),
            }
        }

        if sorted.len() != self.cells.len() {
            return Err(topology!(
                "Cell graph is not acyclic: ordered {} of {} cells",
                sorted.len(),
                self.cells.len()
            ));
        }

        Ok(sorted)
    }
}

/// Smallest number of bytes able to hold `value`, at least one
fn bytes_needed(value: usize) -> usize {
    let bits = (usize::BITS - value.leading_zeros()) as usize;
    bits.div_ceil(8).max(1)
}

fn write_uint(buf: &mut Vec<u8>, value: usize, size: usize) {
    let mut bytes = [0u8; 8];
    BigEndian::write_uint(&mut bytes, value as u64, size);
    buf.extend_from_slice(&bytes[..size]);
}

/// Serializes a cell and everything it references into a Bag of Cells
pub fn serialize_boc(root: &Arc<Cell>, options: &BocOptions) -> Result<Vec<u8>> {
    if options.flags > 3 {
        return Err(range!("BoC flags must fit in 2 bits, got {}", options.flags));
    }

    let arena = CellArena::collect(root);
    let order = arena.sort(options.topological_order)?;

    let mut position = vec![0usize; order.len()];
    for (pos, &id) in order.iter().enumerate() {
        position[id] = pos;
    }

    let cells_num = order.len();
    let size_bytes = bytes_needed(cells_num);

    // Cell records and their cumulative end offsets
    let mut records = Vec::new();
    let mut end_offsets = Vec::with_capacity(cells_num);
    for &id in &order {
        let cell = &arena.cells[id];
        records.extend_from_slice(&cell.descriptors());
        records.extend_from_slice(&cell.augmented_data());
        for &child in &arena.children[id] {
            write_uint(&mut records, position[child], size_bytes);
        }
        end_offsets.push(records.len());
    }

    let tot_cells_size = records.len();
    let cache_shift = usize::from(options.has_cache_bits);
    let offset_bytes = bytes_needed(tot_cells_size << cache_shift);

    log::debug!(
        "Serializing BoC: {} cells, {} bytes of records, size_bytes={}, offset_bytes={}, order={:?}",
        cells_num,
        tot_cells_size,
        size_bytes,
        offset_bytes,
        options.topological_order
    );

    let mut result = Vec::with_capacity(tot_cells_size + 32);
    result.extend_from_slice(&BOC_GENERIC_MAGIC.to_be_bytes());

    let flags_byte = (u8::from(options.has_index) << 7)
        | (u8::from(options.has_crc32) << 6)
        | (u8::from(options.has_cache_bits) << 5)
        | (options.flags << 3)
        | size_bytes as u8;
    result.push(flags_byte);
    result.push(offset_bytes as u8);

    write_uint(&mut result, cells_num, size_bytes);
    // Single root, no absent cells
    write_uint(&mut result, 1, size_bytes);
    write_uint(&mut result, 0, size_bytes);
    write_uint(&mut result, tot_cells_size, offset_bytes);
    write_uint(&mut result, position[0], size_bytes);

    if options.has_index {
        for offset in &end_offsets {
            write_uint(&mut result, offset << cache_shift, offset_bytes);
        }
    }

    result.extend_from_slice(&records);

    if options.has_crc32 {
        let crc = CRC32C.checksum(&result);
        result.extend_from_slice(&crc.to_le_bytes());
    }

    Ok(result)
}

/// Decoded BoC header fields
#[derive(Debug)]
struct BocHeader {
    has_index: bool,
    has_crc32: bool,
    has_cache_bits: bool,
    size_bytes: usize,
    offset_bytes: usize,
    cells_num: usize,
    roots_num: usize,
    tot_cells_size: usize,
}

/// Bounds-checked reader over a BoC buffer
struct BocReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> BocReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    fn read_u8(&mut self, what: &str) -> Result<u8> {
        self.cursor
            .read_u8()
            .map_err(|_| format_err!("Unexpected end of BoC data while reading {}", what))
    }

    /// Reads a big-endian integer of `size` bytes (1..=8)
    fn read_uint(&mut self, size: usize, what: &str) -> Result<usize> {
        self.cursor
            .read_uint::<BigEndian>(size)
            .map(|value| value as usize)
            .map_err(|_| format_err!("Unexpected end of BoC data while reading {}", what))
    }

    fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(format_err!(
                "Unexpected end of BoC data while reading {}: need {} bytes, have {}",
                what,
                len,
                self.remaining()
            ));
        }
        let start = self.position();
        let data: &'a [u8] = *self.cursor.get_ref();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }
}

fn read_header(reader: &mut BocReader<'_>) -> Result<BocHeader> {
    let magic = reader
        .cursor
        .read_u32::<BigEndian>()
        .map_err(|_| format_err!("Not enough bytes for BoC magic prefix"))?;
    let flags_byte = reader.read_u8("flags")?;

    let (has_index, has_crc32, has_cache_bits, size_bytes) = match magic {
        BOC_GENERIC_MAGIC => (
            flags_byte & 0x80 != 0,
            flags_byte & 0x40 != 0,
            flags_byte & 0x20 != 0,
            (flags_byte & 0x07) as usize,
        ),
        BOC_INDEXED_MAGIC => (true, false, false, flags_byte as usize),
        BOC_INDEXED_CRC32C_MAGIC => (true, true, false, flags_byte as usize),
        _ => return Err(format_err!("Invalid BoC magic number: 0x{:08x}", magic)),
    };

    if !(1..=4).contains(&size_bytes) {
        return Err(format_err!("Invalid size_bytes: {}", size_bytes));
    }

    let offset_bytes = reader.read_u8("offset_bytes")? as usize;
    if !(1..=8).contains(&offset_bytes) {
        return Err(format_err!("Invalid offset_bytes: {}", offset_bytes));
    }

    let cells_num = reader.read_uint(size_bytes, "cells_num")?;
    let roots_num = reader.read_uint(size_bytes, "roots_num")?;
    let absent_num = reader.read_uint(size_bytes, "absent_num")?;
    let tot_cells_size = reader.read_uint(offset_bytes, "tot_cells_size")?;

    if roots_num == 0 {
        return Err(format_err!("BoC declares no root cells"));
    }
    if roots_num > MAX_BOC_ROOTS {
        return Err(topology!(
            "BoC declares {} roots, at most {} are supported",
            roots_num,
            MAX_BOC_ROOTS
        ));
    }
    if roots_num > cells_num {
        return Err(format_err!(
            "BoC declares {} roots but only {} cells",
            roots_num,
            cells_num
        ));
    }
    if absent_num != 0 {
        return Err(format_err!("Absent cells are not supported, got {}", absent_num));
    }
    // Every record carries at least its two descriptor bytes
    if cells_num > tot_cells_size / 2 {
        return Err(format_err!(
            "{} cells cannot fit in {} bytes of cell data",
            cells_num,
            tot_cells_size
        ));
    }

    Ok(BocHeader {
        has_index,
        has_crc32,
        has_cache_bits,
        size_bytes,
        offset_bytes,
        cells_num,
        roots_num,
        tot_cells_size,
    })
}

/// A decoded cell record whose children are still indices
struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    is_exotic: bool,
    refs: Vec<usize>,
}

fn read_cell(reader: &mut BocReader<'_>, size_bytes: usize, index: usize) -> Result<RawCell> {
    let d1 = reader.read_u8("cell descriptors")?;
    let d2 = reader.read_u8("cell descriptors")?;

    let ref_count = (d1 & 0x07) as usize;
    let is_exotic = d1 & 0x08 != 0;
    let with_hashes = d1 & 0x10 != 0;
    let level = d1 >> 5;

    if ref_count > MAX_CELL_REFS {
        return Err(format_err!(
            "Cell {} has {} references, maximum is {}",
            index,
            ref_count,
            MAX_CELL_REFS
        ));
    }
    if with_hashes {
        return Err(format_err!("Cell {} carries stored hashes, which are not supported", index));
    }
    if level != 0 {
        return Err(format_err!("Cell {} has unsupported level {}", index, level));
    }

    let data_len = (d2 as usize).div_ceil(2);
    let data = reader.read_bytes(data_len, "cell data")?.to_vec();
    let bit_len = if d2 % 2 == 1 {
        bits::rollback_bytes(&data)?
    } else {
        data_len * 8
    };

    let refs = (0..ref_count)
        .map(|_| reader.read_uint(size_bytes, "cell reference"))
        .collect::<Result<Vec<_>>>()?;

    Ok(RawCell {
        data,
        bit_len,
        is_exotic,
        refs,
    })
}

/// Deserializes a Bag of Cells into all of its root cells
pub fn deserialize_boc_roots(data: &[u8]) -> Result<Vec<Arc<Cell>>> {
    let mut reader = BocReader::new(data);
    let header = read_header(&mut reader)?;

    log::debug!("Deserializing BoC: {:?}", header);

    let root_list = (0..header.roots_num)
        .map(|_| reader.read_uint(header.size_bytes, "root list"))
        .collect::<Result<Vec<_>>>()?;

    let index = if header.has_index {
        let entries = (0..header.cells_num)
            .map(|_| reader.read_uint(header.offset_bytes, "index"))
            .collect::<Result<Vec<_>>>()?;
        Some(entries)
    } else {
        None
    };

    let cells_data = reader.read_bytes(header.tot_cells_size, "cell data")?;

    if header.has_crc32 {
        let covered = reader.position();
        let stored = reader.read_bytes(4, "crc32c")?;
        let expected = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
        let actual = CRC32C.checksum(&data[..covered]);
        if expected != actual {
            return Err(format_err!(
                "CRC32C mismatch: expected 0x{:08x}, got 0x{:08x}",
                expected,
                actual
            ));
        }
    }

    if reader.remaining() != 0 {
        return Err(format_err!(
            "Too many bytes in BoC: {} trailing",
            reader.remaining()
        ));
    }

    let mut cells_reader = BocReader::new(cells_data);
    let mut raw_cells = Vec::with_capacity(header.cells_num);
    for i in 0..header.cells_num {
        let raw = read_cell(&mut cells_reader, header.size_bytes, i)?;

        if let Some(index) = &index {
            let recorded = index[i] >> usize::from(header.has_cache_bits);
            if recorded != cells_reader.position() {
                return Err(format_err!(
                    "Index entry {} points to offset {}, cell ends at {}",
                    i,
                    recorded,
                    cells_reader.position()
                ));
            }
        }

        log::trace!(
            "Cell {}: {} bits, refs {:?}, exotic {}",
            i,
            raw.bit_len,
            raw.refs,
            raw.is_exotic
        );
        raw_cells.push(raw);
    }

    if cells_reader.remaining() != 0 {
        return Err(format_err!(
            "Cell data has {} unused bytes",
            cells_reader.remaining()
        ));
    }

    // Children always follow their parents, so building back to front
    // finds every child already frozen
    let mut built: Vec<Option<Arc<Cell>>> = vec![None; header.cells_num];
    for (i, raw) in raw_cells.into_iter().enumerate().rev() {
        let mut references = Vec::with_capacity(raw.refs.len());
        for &child in &raw.refs {
            if child <= i || child >= header.cells_num {
                return Err(topology!(
                    "Topological order is broken: cell {} references cell {}",
                    i,
                    child
                ));
            }
            let reference = built[child]
                .clone()
                .ok_or_else(|| topology!("Cell {} is not yet built", child))?;
            references.push(reference);
        }

        let cell = Cell::with_references(raw.data, raw.bit_len, references, raw.is_exotic)?;
        built[i] = Some(Arc::new(cell));
    }

    root_list
        .into_iter()
        .map(|root| {
            built
                .get(root)
                .cloned()
                .flatten()
                .ok_or_else(|| topology!("Root index {} is out of range", root))
        })
        .collect()
}

/// Deserializes a Bag of Cells into its first root cell
pub fn deserialize_boc(data: &[u8]) -> Result<Arc<Cell>> {
    deserialize_boc_roots(data)?
        .into_iter()
        .next()
        .ok_or_else(|| format_err!("BoC declares no root cells"))
}

/// Converts a hex string to a BoC
pub fn hex_to_boc(hex: &str) -> Result<Arc<Cell>> {
    let hex: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&hex).map_err(|e| format_err!("Failed to decode hex: {}", e))?;
    deserialize_boc(&bytes)
}

/// Converts a BoC to a hex string
pub fn boc_to_hex(cell: &Arc<Cell>, options: &BocOptions) -> Result<String> {
    Ok(hex::encode(serialize_boc(cell, options)?))
}

/// Converts a BoC to base64
pub fn boc_to_base64(cell: &Arc<Cell>, options: &BocOptions) -> Result<String> {
    Ok(STANDARD.encode(serialize_boc(cell, options)?))
}

fn decode_base64(b64: &str) -> Result<Vec<u8>> {
    let b64 = b64.trim();
    STANDARD
        .decode(b64)
        .or_else(|_| URL_SAFE.decode(b64))
        .map_err(|e| format_err!("Failed to decode base64: {}", e))
}

/// Converts a base64 string to a BoC
pub fn base64_to_boc(b64: &str) -> Result<Arc<Cell>> {
    deserialize_boc(&decode_base64(b64)?)
}

/// Reads cells from Fift hex text, a hex BoC or a base64 BoC
pub fn parse_boc_any(input: &str) -> Result<Vec<Arc<Cell>>> {
    let trimmed = input.trim();

    if trimmed.starts_with("x{") {
        return fift::parse(trimmed);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if !compact.is_empty() && compact.len() % 2 == 0 && compact.bytes().all(|b| b.is_ascii_hexdigit())
    {
        let bytes = hex::decode(&compact).map_err(|e| format_err!("Failed to decode hex: {}", e))?;
        return deserialize_boc_roots(&bytes);
    }

    deserialize_boc_roots(&decode_base64(&compact)?)
}
