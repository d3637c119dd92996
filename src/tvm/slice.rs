//! Slice implementation for reading data from cells
//!
//! A Slice provides a way to read data from a Cell sequentially,
//! tracking the current position in both bits and references. Every read
//! comes in a consuming `load_*` and a non-consuming `preload_*` flavour;
//! reading past the end fails with [`CellError::Underflow`] and never
//! returns truncated data.
//!
//! [`CellError::Underflow`]: crate::tvm::CellError::Underflow

use crate::tvm::address::Address;
use crate::tvm::bits;
use crate::tvm::builder::Builder;
use crate::tvm::cell::Cell;
use crate::tvm::dict::HashmapE;
use crate::tvm::error::{Result, format_err, range, underflow};
use num_bigint::{BigInt, BigUint};
use std::sync::Arc;

/// A slice for reading data from a cell
#[derive(Debug, Clone)]
pub struct Slice {
    /// The cell being read
    cell: Arc<Cell>,
    /// Current bit position in the cell
    bit_pos: usize,
    /// Current reference position
    ref_pos: usize,
}

impl Slice {
    /// Creates a new slice from a cell
    pub fn new(cell: Arc<Cell>) -> Self {
        Self {
            cell,
            bit_pos: 0,
            ref_pos: 0,
        }
    }

    /// Returns the number of remaining bits
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len() - self.bit_pos
    }

    /// Returns the number of remaining references
    pub fn remaining_refs(&self) -> usize {
        self.cell.reference_count() - self.ref_pos
    }

    /// Checks if there are any remaining bits or references
    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0 && self.remaining_refs() == 0
    }

    /// Gets the underlying cell
    pub fn cell(&self) -> &Arc<Cell> {
        &self.cell
    }

    /// Gets the current bit position
    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    /// Gets the current reference position
    pub fn ref_position(&self) -> usize {
        self.ref_pos
    }

    /// Runs a read on a copy of the cursor, leaving this one in place
    fn preload<T>(&self, read: impl FnOnce(&mut Slice) -> Result<T>) -> Result<T> {
        let mut probe = self.clone();
        read(&mut probe)
    }

    fn ensure_bits(&self, n: usize) -> Result<()> {
        if n > self.remaining_bits() {
            return Err(underflow!(
                "Not enough bits remaining: requested {}, available {}",
                n,
                self.remaining_bits()
            ));
        }
        Ok(())
    }

    /// Skips a number of bits
    pub fn skip(&mut self, n: usize) -> Result<&mut Self> {
        self.ensure_bits(n)?;
        self.bit_pos += n;
        Ok(self)
    }

    /// Skips a number of references
    pub fn skip_refs(&mut self, n: usize) -> Result<&mut Self> {
        if n > self.remaining_refs() {
            return Err(underflow!(
                "Cannot skip {} references: only {} remaining",
                n,
                self.remaining_refs()
            ));
        }
        self.ref_pos += n;
        Ok(self)
    }

    /// Loads a single bit
    pub fn load_bit(&mut self) -> Result<bool> {
        self.ensure_bits(1)?;
        let bit = bits::get_bit(self.cell.data(), self.bit_pos);
        self.bit_pos += 1;
        Ok(bit)
    }

    pub fn preload_bit(&self) -> Result<bool> {
        self.preload(|s| s.load_bit())
    }

    /// Loads `n` bits (n > 0) packed MSB-first into bytes
    pub fn load_bits(&mut self, n: usize) -> Result<Vec<u8>> {
        if n == 0 {
            return Err(range!("Bit count to load must be positive"));
        }
        self.ensure_bits(n)?;

        let data = self.cell.data();
        let mut result = vec![0u8; n.div_ceil(8)];
        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            result.copy_from_slice(&data[start..start + n.div_ceil(8)]);
            result = bits::normalize(result, n);
        } else {
            for i in 0..n {
                if bits::get_bit(data, self.bit_pos + i) {
                    result[i / 8] |= 1 << (7 - i % 8);
                }
            }
        }

        self.bit_pos += n;
        Ok(result)
    }

    pub fn preload_bits(&self, n: usize) -> Result<Vec<u8>> {
        self.preload(|s| s.load_bits(n))
    }

    /// Loads an unsigned integer of `n` bits (n <= 64); zero bits read as 0
    pub fn load_uint(&mut self, n: usize) -> Result<u64> {
        if n > 64 {
            return Err(range!("Cannot load more than 64 bits into u64, requested {}", n));
        }
        if n == 0 {
            return Ok(0);
        }

        let bytes = self.load_bits(n)?;
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(u64::from_be_bytes(buf) >> (64 - n))
    }

    pub fn preload_uint(&self, n: usize) -> Result<u64> {
        self.preload(|s| s.load_uint(n))
    }

    /// Loads a two's complement signed integer of `n` bits (n <= 64)
    pub fn load_int(&mut self, n: usize) -> Result<i64> {
        if n > 64 {
            return Err(range!("Cannot load more than 64 bits into i64, requested {}", n));
        }
        if n == 0 {
            return Ok(0);
        }

        let unsigned = self.load_uint(n)?;
        // Sign-extend through an arithmetic shift
        Ok(((unsigned << (64 - n)) as i64) >> (64 - n))
    }

    pub fn preload_int(&self, n: usize) -> Result<i64> {
        self.preload(|s| s.load_int(n))
    }

    /// Loads an arbitrary-precision unsigned integer of `n` bits
    pub fn load_big_uint(&mut self, n: usize) -> Result<BigUint> {
        if n == 0 {
            return Ok(BigUint::default());
        }

        let bytes = self.load_bits(n)?;
        Ok(BigUint::from_bytes_be(&bytes) >> (bytes.len() * 8 - n))
    }

    pub fn preload_big_uint(&self, n: usize) -> Result<BigUint> {
        self.preload(|s| s.load_big_uint(n))
    }

    /// Loads an arbitrary-precision two's complement integer of `n` bits
    pub fn load_big_int(&mut self, n: usize) -> Result<BigInt> {
        if n == 0 {
            return Ok(BigInt::default());
        }

        let negative = self.preload_bit()?;
        let unsigned = BigInt::from(self.load_big_uint(n)?);
        if negative {
            Ok(unsigned - (BigInt::from(1) << n))
        } else {
            Ok(unsigned)
        }
    }

    pub fn preload_big_int(&self, n: usize) -> Result<BigInt> {
        self.preload(|s| s.load_big_int(n))
    }

    /// Loads a byte (8 bits)
    pub fn load_byte(&mut self) -> Result<u8> {
        Ok(self.load_uint(8)? as u8)
    }

    /// Loads `n` bits packed into bytes; a partial last byte is zero-padded
    pub fn load_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.load_bits(n)
    }

    pub fn preload_bytes(&self, n: usize) -> Result<Vec<u8>> {
        self.preload(|s| s.load_bytes(n))
    }

    /// Loads a u16 value (16 bits, big-endian)
    pub fn load_u16(&mut self) -> Result<u16> {
        Ok(self.load_uint(16)? as u16)
    }

    /// Loads a u32 value (32 bits, big-endian)
    pub fn load_u32(&mut self) -> Result<u32> {
        Ok(self.load_uint(32)? as u32)
    }

    /// Loads a u64 value (64 bits, big-endian)
    pub fn load_u64(&mut self) -> Result<u64> {
        self.load_uint(64)
    }

    /// Loads a UTF-8 string from `n` bits, or from all remaining bits for `None`
    ///
    /// The bits go through [`Slice::load_bytes`], so a partial last byte is
    /// zero-padded before decoding.
    pub fn load_string(&mut self, n: Option<usize>) -> Result<String> {
        let n = n.unwrap_or_else(|| self.remaining_bits());
        self.ensure_bits(n)?;

        let bytes = self.preload_bytes(n)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| format_err!("Invalid UTF-8 string: {}", e))?;
        self.bit_pos += n;
        Ok(text)
    }

    pub fn preload_string(&self, n: Option<usize>) -> Result<String> {
        self.preload(|s| s.load_string(n))
    }

    /// Loads a reference to another cell
    pub fn load_ref(&mut self) -> Result<Arc<Cell>> {
        let reference = self.preload_ref()?;
        self.ref_pos += 1;
        Ok(reference)
    }

    /// Returns the next reference without advancing the position
    pub fn preload_ref(&self) -> Result<Arc<Cell>> {
        self.cell
            .reference(self.ref_pos)
            .cloned()
            .ok_or_else(|| underflow!("No more references to read"))
    }

    /// Loads an optional reference (Maybe ^Cell)
    pub fn load_maybe_ref(&mut self) -> Result<Option<Arc<Cell>>> {
        let probe = self.preload(|s| {
            let present = s.load_bit()?;
            let reference = if present { Some(s.load_ref()?) } else { None };
            Ok((s.bit_pos, s.ref_pos, reference))
        })?;
        (self.bit_pos, self.ref_pos) = (probe.0, probe.1);
        Ok(probe.2)
    }

    /// Loads all remaining references
    pub fn load_remaining_refs(&mut self) -> Result<Vec<Arc<Cell>>> {
        let refs = self.cell.references()[self.ref_pos..].to_vec();
        self.ref_pos = self.cell.reference_count();
        Ok(refs)
    }

    /// Loads everything left in the slice as a new cell
    pub fn load_remaining(&mut self) -> Result<Arc<Cell>> {
        let mut builder = Builder::new();
        builder.store_slice(self)?;
        self.bit_pos = self.cell.bit_len();
        self.ref_pos = self.cell.reference_count();
        builder.build()
    }

    /// Loads a standard address: `00` is none, `10` is `addr_std` without anycast
    pub fn load_address(&mut self) -> Result<Option<Address>> {
        let flag = self.preload_uint(2)?;
        match flag {
            0b00 => {
                self.skip(2)?;
                Ok(None)
            }
            0b10 => {
                self.ensure_bits(Address::STD_BITS)?;
                // flag + anycast bit
                self.skip(3)?;
                let workchain = self.load_int(8)? as i8;
                let mut hash_part = [0u8; 32];
                hash_part.copy_from_slice(&self.load_bytes(256)?);
                Ok(Some(Address::new(workchain, hash_part)))
            }
            other => Err(format_err!("Bad address flag bits: {:02b}", other)),
        }
    }

    pub fn preload_address(&self) -> Result<Option<Address>> {
        self.preload(|s| s.load_address())
    }

    /// Loads a variable-length unsigned integer (VarUInteger)
    /// First `length_bits` encode the byte length, then that many bytes of data
    pub fn load_var_uint(&mut self, length_bits: usize) -> Result<BigUint> {
        let (bit_pos, value) = self.preload(|s| {
            let byte_len = s.load_uint(length_bits)?;
            let bit_len = usize::try_from(byte_len)
                .ok()
                .and_then(|len| len.checked_mul(8))
                .ok_or_else(|| range!("VarUInteger length {} bytes is too large", byte_len))?;
            let value = s.load_big_uint(bit_len)?;
            Ok((s.bit_pos, value))
        })?;
        self.bit_pos = bit_pos;
        Ok(value)
    }

    /// Loads coins (VarUInteger 16)
    /// Length is encoded in 4 bits, then that many bytes of value
    pub fn load_coins(&mut self) -> Result<BigUint> {
        self.load_var_uint(4)
    }

    pub fn preload_coins(&self) -> Result<BigUint> {
        self.preload(|s| s.load_coins())
    }

    /// Loads an embedded dictionary (presence bit + optional root reference)
    pub fn load_dict(&mut self, key_size: usize) -> Result<HashmapE> {
        HashmapE::parse(self, key_size)
    }

    pub fn preload_dict(&self, key_size: usize) -> Result<HashmapE> {
        self.preload(|s| s.load_dict(key_size))
    }
}

impl From<Arc<Cell>> for Slice {
    fn from(cell: Arc<Cell>) -> Self {
        Self::new(cell)
    }
}
