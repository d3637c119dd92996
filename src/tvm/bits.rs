//! Bit-level helpers shared by cells, builders and the text codecs
//!
//! Bits are packed MSB-first: bit `i` of a sequence lives in byte `i / 8`
//! at position `7 - i % 8`.

use crate::tvm::error::{Result, format_err, range};

/// Packs a bit sequence into bytes, zero-filling the tail of the last byte
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut data = vec![0u8; bits.len().div_ceil(8)];
    for (i, _) in bits.iter().enumerate().filter(|(_, bit)| **bit) {
        data[i / 8] |= 1 << (7 - i % 8);
    }
    data
}

/// Unpacks the first `bit_len` bits of `data`
pub fn unpack_bits(data: &[u8], bit_len: usize) -> Vec<bool> {
    (0..bit_len).map(|i| get_bit(data, i)).collect()
}

/// Reads bit `index` of a packed buffer
#[inline]
pub fn get_bit(data: &[u8], index: usize) -> bool {
    (data[index / 8] >> (7 - index % 8)) & 1 == 1
}

/// Zeroes every bit past `bit_len` and drops surplus bytes
pub(crate) fn normalize(mut data: Vec<u8>, bit_len: usize) -> Vec<u8> {
    data.truncate(bit_len.div_ceil(8));
    if bit_len % 8 != 0 {
        if let Some(last) = data.last_mut() {
            *last &= 0xFFu8 << (8 - bit_len % 8);
        }
    }
    data
}

/// Appends a single `1` followed by `0`s so the length becomes a multiple of `divider`
///
/// The marker is always written, so an aligned sequence grows by a whole
/// `divider` bits. Only 4 and 8 are valid dividers.
pub fn augment_bits(bits: &[bool], divider: usize) -> Result<Vec<bool>> {
    if divider != 4 && divider != 8 {
        return Err(range!("Augmentation divider must be 4 or 8, got {}", divider));
    }

    let mut result = bits.to_vec();
    result.push(true);
    while result.len() % divider != 0 {
        result.push(false);
    }
    Ok(result)
}

/// Removes augmentation added by [`augment_bits`]
///
/// The terminating `1` must be found within the last 8 bits.
pub fn rollback_bits(bits: &[bool]) -> Result<Vec<bool>> {
    let marker = bits
        .iter()
        .rev()
        .take(8)
        .position(|bit| *bit)
        .ok_or_else(|| format_err!("Incorrectly augmented bits: no terminating 1 in the last 8 bits"))?;

    Ok(bits[..bits.len() - marker - 1].to_vec())
}

/// Packs `bit_len` bits and sets the augmentation marker right after them
///
/// Byte-aligned data is returned as is.
pub fn augment_bytes(data: &[u8], bit_len: usize) -> Vec<u8> {
    let mut result = data[..bit_len.div_ceil(8)].to_vec();
    if bit_len % 8 != 0 {
        result[bit_len / 8] |= 1 << (7 - bit_len % 8);
    }
    result
}

/// Inverse of [`augment_bytes`]: returns the bit length of augmented data
pub fn rollback_bytes(data: &[u8]) -> Result<usize> {
    let last = data
        .last()
        .ok_or_else(|| format_err!("Incorrectly augmented bits: empty data"))?;

    // The marker can only sit in the low 7 bits of the final byte
    if last & 0x7F == 0 {
        return Err(format_err!(
            "Incorrectly augmented bits: no terminating 1 in the last 7 bits"
        ));
    }

    Ok(data.len() * 8 - last.trailing_zeros() as usize - 1)
}

/// Encodes bits as upper-case Fift hex, adding a `_` suffix for nibble-augmented data
pub fn to_fift_hex(data: &[u8], bit_len: usize) -> String {
    let aligned = bit_len % 4 == 0;
    let mut bits = unpack_bits(data, bit_len);
    if !aligned {
        bits.push(true);
        while bits.len() % 4 != 0 {
            bits.push(false);
        }
    }

    let mut hex: String = bits
        .chunks(4)
        .map(|nibble| {
            let value = nibble.iter().fold(0u32, |acc, bit| (acc << 1) | *bit as u32);
            char::from_digit(value, 16).unwrap_or('0').to_ascii_uppercase()
        })
        .collect();

    if !aligned {
        hex.push('_');
    }
    hex
}

/// Decodes Fift hex (optionally `_`-terminated) into packed bytes and a bit length
pub fn from_fift_hex(text: &str) -> Result<(Vec<u8>, usize)> {
    let (digits, augmented) = match text.strip_suffix('_') {
        Some(rest) => (rest, true),
        None => (text, false),
    };

    let mut bits = Vec::with_capacity(digits.len() * 4);
    for ch in digits.chars() {
        let value = ch
            .to_digit(16)
            .ok_or_else(|| format_err!("Invalid Fift hex digit '{}'", ch))?;
        bits.extend((0..4).rev().map(|shift| (value >> shift) & 1 == 1));
    }

    if augmented {
        let marker = bits
            .iter()
            .rposition(|bit| *bit)
            .ok_or_else(|| format_err!("Incorrectly augmented Fift hex '{}'", text))?;
        bits.truncate(marker);
    }

    let bit_len = bits.len();
    Ok((pack_bits(&bits), bit_len))
}
