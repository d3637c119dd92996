//! Cell implementation for TON blockchain
//!
//! A cell is a fundamental data structure in TON that can store up to 1023 bits
//! of data and maintain up to 4 references to other cells.
//!
//! Cells are immutable once constructed. Because every child is already frozen
//! when its parent is created, the representation hash and depth are computed
//! eagerly in the constructor and never require walking the subtree.

use crate::tvm::bits;
use crate::tvm::error::{Result, capacity, format_err};
use crate::tvm::fift;
use crate::tvm::slice::Slice;
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Maximum number of bits a cell can store
pub const MAX_CELL_BITS: usize = 1023;

/// Maximum number of references a cell can have
pub const MAX_CELL_REFS: usize = 4;

/// Cell level range (0-3)
pub const MAX_CELL_LEVEL: u8 = 3;

/// Represents a cell in the TON blockchain
#[derive(Clone)]
pub struct Cell {
    /// Cell data, MSB-first, trailing bits of the last byte are zero
    data: Vec<u8>,
    /// Number of bits in the cell (not necessarily a multiple of 8)
    bit_len: usize,
    /// References to other cells
    references: Vec<Arc<Cell>>,
    /// Whether this is an exotic (special) cell
    is_exotic: bool,
    /// Cell level (0-3)
    level: u8,
    /// Representation hash
    hash: [u8; 32],
    /// Maximum depth of the subtree rooted here
    depth: u16,
}

impl Cell {
    /// Creates a new empty cell
    pub fn new() -> Self {
        Self::assemble(Vec::new(), 0, Vec::new(), false)
    }

    /// Creates a cell with the given data and bit length
    pub fn with_data(data: Vec<u8>, bit_len: usize) -> Result<Self> {
        Self::with_references(data, bit_len, Vec::new(), false)
    }

    /// Creates a cell with data, references and the exotic flag
    pub fn with_references(
        data: Vec<u8>,
        bit_len: usize,
        references: Vec<Arc<Cell>>,
        is_exotic: bool,
    ) -> Result<Self> {
        if bit_len > MAX_CELL_BITS {
            return Err(capacity!(
                "Cell bit length {} exceeds maximum {}",
                bit_len,
                MAX_CELL_BITS
            ));
        }

        if references.len() > MAX_CELL_REFS {
            return Err(capacity!(
                "Cell has {} references, maximum is {}",
                references.len(),
                MAX_CELL_REFS
            ));
        }

        if data.len() < bit_len.div_ceil(8) {
            return Err(format_err!(
                "Data length {} is insufficient for {} bits",
                data.len(),
                bit_len
            ));
        }

        Ok(Self::assemble(
            bits::normalize(data, bit_len),
            bit_len,
            references,
            is_exotic,
        ))
    }

    fn assemble(
        data: Vec<u8>,
        bit_len: usize,
        references: Vec<Arc<Cell>>,
        is_exotic: bool,
    ) -> Self {
        // Exotic level rules are not modelled: the level is inherited from children
        let level = references.iter().map(|r| r.level).max().unwrap_or(0);

        let depth = references
            .iter()
            .map(|r| r.depth.saturating_add(1))
            .max()
            .unwrap_or(0);

        let mut cell = Self {
            data,
            bit_len,
            references,
            is_exotic,
            level,
            hash: [0u8; 32],
            depth,
        };
        cell.hash = cell.compute_hash();
        cell
    }

    /// Returns the cell's data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the number of bits in the cell
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Returns the cell's data as individual bits
    pub fn bits(&self) -> Vec<bool> {
        bits::unpack_bits(&self.data, self.bit_len)
    }

    /// Returns the cell's references
    pub fn references(&self) -> &[Arc<Cell>] {
        &self.references
    }

    /// Returns whether this is an exotic cell
    pub fn is_exotic(&self) -> bool {
        self.is_exotic
    }

    /// Returns the cell's level
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Computes the cell's descriptors (2 bytes)
    pub fn descriptors(&self) -> [u8; 2] {
        // First byte: r + 8*s + 32*l
        let refs_descriptor = self.references.len() as u8
            + if self.is_exotic { 8 } else { 0 }
            + self.level * 32;

        // Second byte: floor(b/8) + ceil(b/8)
        let bits_descriptor = (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8;

        [refs_descriptor, bits_descriptor]
    }

    /// Returns the data padded to a byte boundary with a `1` marker and zeros
    pub fn augmented_data(&self) -> Vec<u8> {
        bits::augment_bytes(&self.data, self.bit_len)
    }

    /// Returns the depth of the cell: 0 for a leaf, otherwise 1 + deepest child
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Returns the representation hash of the cell
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    /// Returns the representation hash as lower-case hex
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();

        hasher.update(self.descriptors());
        hasher.update(self.augmented_data());

        for reference in &self.references {
            hasher.update(reference.depth.to_be_bytes());
        }

        for reference in &self.references {
            hasher.update(reference.hash);
        }

        hasher.finalize().into()
    }

    /// Returns the number of references
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Gets a reference by index
    pub fn reference(&self, index: usize) -> Option<&Arc<Cell>> {
        self.references.get(index)
    }

    /// Opens a read cursor over this cell
    pub fn parse(self: &Arc<Self>) -> Slice {
        Slice::new(self.clone())
    }

    /// Renders the subtree as indented Fift hex, one cell per line
    pub fn to_fift_hex(&self) -> String {
        fift::print(self)
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Cell {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Cell {}

impl Hash for Cell {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.hash);
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &bits::to_fift_hex(&self.data, self.bit_len))
            .field("bit_len", &self.bit_len)
            .field("references", &self.references.len())
            .field("is_exotic", &self.is_exotic)
            .field("hash", &self.hash_hex())
            .finish()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fift_hex())
    }
}
