//! Builder for constructing cells
//!
//! `Builder` accumulates bits and references up to a declared bit capacity
//! (1023 by default) and 4 references, then freezes into an immutable
//! [`Cell`]. Every store checks the remaining budget before writing, so a
//! failed store leaves the builder untouched.
//!
//! # Examples
//!
//! ```rust
//! use tonutils_boc::tvm::{Address, Builder};
//!
//! let mut builder = Builder::new();
//!
//! // Store an address
//! let addr = Address::new(0, [0u8; 32]);
//! builder.store_address(Some(&addr)).unwrap();
//!
//! // Store coins (1 TON)
//! builder.store_coins(1_000_000_000u64).unwrap();
//!
//! // Store a string
//! builder.store_string("Hello, TON!").unwrap();
//!
//! // Build the cell
//! let cell = builder.build().unwrap();
//! assert_eq!(cell.bit_len(), 267 + 4 + 32 + 88);
//! ```

use crate::tvm::address::Address;
use crate::tvm::bits;
use crate::tvm::cell::{Cell, MAX_CELL_BITS, MAX_CELL_REFS};
use crate::tvm::dict::HashmapE;
use crate::tvm::error::{Result, capacity, range};
use crate::tvm::slice::Slice;
use num_bigint::{BigInt, BigUint, Sign};
use std::sync::Arc;

/// Mutable accumulator of bits and references
#[derive(Debug, Clone)]
pub struct Builder {
    data: Vec<u8>,
    bit_len: usize,
    capacity: usize,
    references: Vec<Arc<Cell>>,
}

impl Builder {
    /// Creates a new builder with the full 1023-bit capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_CELL_BITS)
    }

    /// Creates a builder limited to `capacity` bits (never more than 1023)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            bit_len: 0,
            capacity: capacity.min(MAX_CELL_BITS),
            references: Vec::new(),
        }
    }

    /// Returns the declared bit capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of bits used
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Returns the number of available bits
    pub fn available_bits(&self) -> usize {
        self.capacity - self.bit_len
    }

    /// Returns the number of references
    pub fn ref_count(&self) -> usize {
        self.references.len()
    }

    /// Returns the number of available references
    pub fn available_refs(&self) -> usize {
        MAX_CELL_REFS - self.references.len()
    }

    /// Returns the stored bits
    pub fn bits(&self) -> Vec<bool> {
        bits::unpack_bits(&self.data, self.bit_len)
    }

    /// Returns the stored references
    pub fn references(&self) -> &[Arc<Cell>] {
        &self.references
    }

    fn check_bits(&self, bit_len: usize) -> Result<()> {
        if bit_len > self.available_bits() {
            return Err(capacity!(
                "Builder bits overflow: can't add {} bits, only {} bits left",
                bit_len,
                self.available_bits()
            ));
        }
        Ok(())
    }

    fn check_refs(&self, count: usize) -> Result<()> {
        if count > self.available_refs() {
            return Err(capacity!(
                "Builder refs overflow: can't add {} refs, only {} refs left",
                count,
                self.available_refs()
            ));
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 1 << (7 - self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    /// Stores a single bit
    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self> {
        self.check_bits(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    /// Stores the first `bit_len` bits of a packed byte slice
    pub fn store_bits(&mut self, bits: &[u8], bit_len: usize) -> Result<&mut Self> {
        if bits.len() < bit_len.div_ceil(8) {
            return Err(range!("Insufficient data for {} bits", bit_len));
        }
        self.check_bits(bit_len)?;

        if self.bit_len % 8 == 0 {
            // Aligned fast path
            self.data
                .extend_from_slice(&bits::normalize(bits.to_vec(), bit_len));
            self.bit_len += bit_len;
        } else {
            for i in 0..bit_len {
                self.push_bit(bits::get_bit(bits, i));
            }
        }

        Ok(self)
    }

    /// Stores a sequence of individual bits
    pub fn store_bit_slice(&mut self, bits: &[bool]) -> Result<&mut Self> {
        self.check_bits(bits.len())?;
        for bit in bits {
            self.push_bit(*bit);
        }
        Ok(self)
    }

    /// Stores a byte
    pub fn store_byte(&mut self, byte: u8) -> Result<&mut Self> {
        self.store_bits(&[byte], 8)
    }

    /// Stores multiple bytes
    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self> {
        self.store_bits(bytes, bytes.len() * 8)
    }

    /// Stores a string as its UTF-8 bytes
    pub fn store_string(&mut self, s: &str) -> Result<&mut Self> {
        self.store_bytes(s.as_bytes())
    }

    /// Stores a u32 value
    pub fn store_u32(&mut self, value: u32) -> Result<&mut Self> {
        self.store_bits(&value.to_be_bytes(), 32)
    }

    /// Stores a u64 value
    pub fn store_u64(&mut self, value: u64) -> Result<&mut Self> {
        self.store_bits(&value.to_be_bytes(), 64)
    }

    /// Stores a boolean value as a single bit
    pub fn store_bool(&mut self, value: bool) -> Result<&mut Self> {
        self.store_bit(value)
    }

    /// Stores an unsigned integer in exactly `bits` bits, big-endian
    ///
    /// Fails if `value >= 2^bits`.
    pub fn store_uint(&mut self, value: u64, bits: usize) -> Result<&mut Self> {
        if bits > 64 {
            return self.store_big_uint(&BigUint::from(value), bits);
        }

        if bits < 64 && value >> bits != 0 {
            return Err(range!("Value {} does not fit in {} unsigned bits", value, bits));
        }
        self.check_bits(bits)?;

        // Left-align the value so the top `bits` bits are the payload
        let aligned = if bits == 0 { 0 } else { value << (64 - bits) };
        self.store_bits(&aligned.to_be_bytes(), bits)
    }

    /// Stores a signed integer in exactly `bits` bits, two's complement
    ///
    /// Fails unless `-2^(bits-1) <= value < 2^(bits-1)`.
    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self> {
        if bits > 64 {
            return self.store_big_int(&BigInt::from(value), bits);
        }

        let fits = match bits {
            0 => value == 0,
            64 => true,
            _ => {
                let bound = 1i64 << (bits - 1);
                (-bound..bound).contains(&value)
            }
        };
        if !fits {
            return Err(range!("Value {} does not fit in {} signed bits", value, bits));
        }

        let unsigned = if bits == 0 {
            0
        } else {
            (value as u64) & (u64::MAX >> (64 - bits))
        };
        self.store_uint(unsigned, bits)
    }

    /// Stores an arbitrary-precision unsigned integer in exactly `bits` bits
    pub fn store_big_uint(&mut self, value: &BigUint, bits: usize) -> Result<&mut Self> {
        if value.bits() > bits as u64 {
            return Err(range!("Value {} does not fit in {} unsigned bits", value, bits));
        }
        self.check_bits(bits)?;
        if bits == 0 {
            return Ok(self);
        }

        let byte_len = bits.div_ceil(8);
        let shifted = value << (byte_len * 8 - bits);
        let raw = shifted.to_bytes_be();

        let mut buf = vec![0u8; byte_len];
        // `raw` is [0] for zero, which still fits in `buf`
        buf[byte_len - raw.len()..].copy_from_slice(&raw);
        self.store_bits(&buf, bits)
    }

    /// Stores an arbitrary-precision signed integer in exactly `bits` bits
    pub fn store_big_int(&mut self, value: &BigInt, bits: usize) -> Result<&mut Self> {
        let fits = if bits == 0 {
            value.sign() == Sign::NoSign
        } else {
            let bound = BigInt::from(1) << (bits - 1);
            *value >= -bound.clone() && *value < bound
        };
        if !fits {
            return Err(range!("Value {} does not fit in {} signed bits", value, bits));
        }

        let unsigned = if value.sign() == Sign::Minus {
            ((BigInt::from(1) << bits) + value).into_parts().1
        } else {
            value.magnitude().clone()
        };
        self.store_big_uint(&unsigned, bits)
    }

    /// Stores a variable-length unsigned integer (VarUInteger)
    ///
    /// `length_bits` bits of byte length, then that many bytes of value.
    pub fn store_var_uint(&mut self, value: &BigUint, length_bits: usize) -> Result<&mut Self> {
        let byte_len = value.bits().div_ceil(8) as usize;
        let max_len = u32::try_from(length_bits)
            .ok()
            .and_then(|shift| 1usize.checked_shl(shift))
            .map_or(usize::MAX, |limit| limit - 1);
        if byte_len > max_len {
            return Err(range!(
                "Value {} needs {} bytes, a {}-bit length allows at most {}",
                value,
                byte_len,
                length_bits,
                max_len
            ));
        }
        self.check_bits(length_bits + byte_len * 8)?;

        self.store_uint(byte_len as u64, length_bits)?;
        self.store_big_uint(value, byte_len * 8)
    }

    /// Stores coins (VarUInteger 16): 4-bit byte length, then the amount
    ///
    /// Zero is stored as a bare zero length. Negative amounts are rejected.
    pub fn store_coins(&mut self, amount: impl Into<BigInt>) -> Result<&mut Self> {
        let (sign, magnitude) = amount.into().into_parts();
        if sign == Sign::Minus {
            return Err(range!("Coins value can't be negative"));
        }
        self.store_var_uint(&magnitude, 4)
    }

    /// Stores a TON address, or `addr_none` for `None`
    pub fn store_address(&mut self, address: Option<&Address>) -> Result<&mut Self> {
        match address {
            None => {
                // addr_none$00
                self.store_uint(0b00, 2)?;
            }
            Some(addr) => {
                // addr_std$10 anycast:(Maybe Anycast) workchain_id:int8 address:bits256
                self.check_bits(Address::STD_BITS)?;
                self.store_uint(0b10, 2)?;
                self.store_bit(false)?; // no anycast
                self.store_int(addr.workchain as i64, 8)?;
                self.store_bytes(&addr.hash_part)?;
            }
        }
        Ok(self)
    }

    /// Stores a reference to another cell
    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self> {
        self.check_refs(1)?;
        self.references.push(cell);
        Ok(self)
    }

    /// Stores an optional reference (Maybe ^Cell)
    pub fn store_maybe_ref(&mut self, cell: Option<Arc<Cell>>) -> Result<&mut Self> {
        match cell {
            Some(c) => {
                self.check_bits(1)?;
                self.check_refs(1)?;
                self.store_bit(true)?;
                self.store_ref(c)?;
            }
            None => {
                self.store_bit(false)?;
            }
        }
        Ok(self)
    }

    /// Stores the bits and references of a whole cell
    pub fn store_cell(&mut self, cell: &Cell) -> Result<&mut Self> {
        self.check_bits(cell.bit_len())?;
        self.check_refs(cell.reference_count())?;

        self.store_bits(cell.data(), cell.bit_len())?;
        for reference in cell.references() {
            self.store_ref(reference.clone())?;
        }

        Ok(self)
    }

    /// Stores the remaining bits and references of a slice
    pub fn store_slice(&mut self, slice: &Slice) -> Result<&mut Self> {
        self.check_bits(slice.remaining_bits())?;
        self.check_refs(slice.remaining_refs())?;

        let mut rest = slice.clone();
        let bit_len = rest.remaining_bits();
        if bit_len > 0 {
            let data = rest.load_bits(bit_len)?;
            self.store_bits(&data, bit_len)?;
        }
        for reference in rest.load_remaining_refs()? {
            self.store_ref(reference)?;
        }

        Ok(self)
    }

    /// Stores a dictionary: its presence bit and, if non-empty, the root reference
    pub fn store_dict(&mut self, dict: &HashmapE) -> Result<&mut Self> {
        let cell = dict.build()?;
        self.store_cell(&cell)
    }

    /// Freezes the accumulated state into a new cell
    ///
    /// The builder keeps its contents; storing more afterwards never affects
    /// cells built earlier.
    pub fn build(&self) -> Result<Arc<Cell>> {
        Ok(Arc::new(Cell::with_references(
            self.data.clone(),
            self.bit_len,
            self.references.clone(),
            false,
        )?))
    }

    /// Builds the cell and opens a slice over it
    pub fn to_slice(&self) -> Result<Slice> {
        Ok(Slice::new(self.build()?))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
