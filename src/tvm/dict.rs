//! TON Dictionary (HashMap) implementation
//!
//! Dictionaries in TON are Patricia trees over fixed-width bit keys stored in cells.
//! Every edge starts with a label holding the longest common prefix of the keys
//! below it, written in the most compact of three forms:
//!
//! - `hml_short$0`: unary length, then the label bits
//! - `hml_long$10`: length in `bitlen(m)` bits, then the label bits
//! - `hml_same$11`: one repeated bit and its count in `bitlen(m)` bits
//!
//! where `m` is the number of key bits still unresolved at that edge. After the
//! label either the value follows (leaf) or the edge forks into children by the
//! next key bit.

use crate::tvm::address::Address;
use crate::tvm::bits;
use crate::tvm::builder::Builder;
use crate::tvm::cell::Cell;
use crate::tvm::error::{CellError, Result, format_err, range};
use crate::tvm::slice::Slice;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Dictionary key type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    /// Unsigned integer key
    Uint(u64),
    /// Signed (two's complement) integer key
    Int(i64),
    /// Binary key (as bit string)
    Bits(Vec<u8>, usize), // data, bit_length
    /// Address key (267 bits)
    Address(Address),
}

impl DictKey {
    /// Expands the key to exactly `key_size` bits
    pub fn to_bits(&self, key_size: usize) -> Result<Vec<bool>> {
        match self {
            DictKey::Uint(value) => {
                if key_size < 64 && value >> key_size != 0 {
                    return Err(range!("Key {} does not fit in {} bits", value, key_size));
                }
                Ok((0..key_size)
                    .rev()
                    .map(|i| i < 64 && (value >> i) & 1 == 1)
                    .collect())
            }
            DictKey::Int(value) => {
                let fits = match key_size {
                    0 => *value == 0,
                    1..64 => {
                        let bound = 1i64 << (key_size - 1);
                        (-bound..bound).contains(value)
                    }
                    _ => true,
                };
                if !fits {
                    return Err(range!("Key {} does not fit in {} signed bits", value, key_size));
                }
                Ok((0..key_size)
                    .rev()
                    .map(|i| (value >> i.min(63)) & 1 == 1)
                    .collect())
            }
            DictKey::Bits(data, bit_len) => {
                if *bit_len != key_size {
                    return Err(range!(
                        "Key bit length {} must match dictionary key size {}",
                        bit_len,
                        key_size
                    ));
                }
                if data.len() < bit_len.div_ceil(8) {
                    return Err(format_err!(
                        "Key data of {} bytes is too short for {} bits",
                        data.len(),
                        bit_len
                    ));
                }
                Ok(bits::unpack_bits(data, *bit_len))
            }
            DictKey::Address(address) => {
                if key_size != Address::STD_BITS {
                    return Err(range!(
                        "Address keys require key_size of {} bits, got {}",
                        Address::STD_BITS,
                        key_size
                    ));
                }
                let mut builder = Builder::new();
                builder.store_address(Some(address))?;
                Ok(builder.bits())
            }
        }
    }
}

impl From<u64> for DictKey {
    fn from(value: u64) -> Self {
        DictKey::Uint(value)
    }
}

impl From<i64> for DictKey {
    fn from(value: i64) -> Self {
        DictKey::Int(value)
    }
}

impl From<Address> for DictKey {
    fn from(address: Address) -> Self {
        DictKey::Address(address)
    }
}

impl From<&[bool]> for DictKey {
    fn from(bits: &[bool]) -> Self {
        DictKey::Bits(bits::pack_bits(bits), bits.len())
    }
}

/// Number of bits needed to write a label length in `0..=m`
fn len_bits(m: usize) -> usize {
    (usize::BITS - m.leading_zeros()) as usize
}

/// Encoded label together with how many key bits it covers
struct Label {
    bits: Vec<bool>,
    covers: usize,
}

fn label_short(label: &[bool]) -> Label {
    let mut bits = Vec::with_capacity(label.len() * 2 + 2);
    bits.push(false);
    bits.extend(std::iter::repeat_n(true, label.len()));
    bits.push(false);
    bits.extend_from_slice(label);
    Label {
        bits,
        covers: label.len(),
    }
}

fn label_long(label: &[bool], m: usize) -> Label {
    let width = len_bits(m);
    let mut bits = vec![true, false];
    bits.extend((0..width).rev().map(|i| (label.len() >> i) & 1 == 1));
    bits.extend_from_slice(label);
    Label {
        bits,
        covers: label.len(),
    }
}

fn label_same(bit: bool, len: usize, m: usize) -> Label {
    let width = len_bits(m);
    let mut bits = vec![true, true, bit];
    bits.extend((0..width).rev().map(|i| (len >> i) & 1 == 1));
    Label { bits, covers: len }
}

/// Picks the shortest label for `prefix`; ties go to short, then long, then same
fn choose_label(prefix: &[bool], m: usize, group_size: usize) -> Label {
    let mut best = label_short(prefix);

    let long = label_long(prefix, m);
    if long.bits.len() < best.bits.len() {
        best = long;
    }

    let repeated = prefix.len() > 1 && prefix.iter().all(|bit| *bit == prefix[0]);
    if group_size > 1 && repeated {
        let same = label_same(prefix[0], prefix.len(), m);
        if same.bits.len() < best.bits.len() {
            best = same;
        }
    }

    log::trace!(
        "Label for {} prefix bits (m = {}): {} encoded bits",
        prefix.len(),
        m,
        best.bits.len()
    );
    best
}

/// Edge holding no keys: a single `0` bit and no references
fn empty_edge() -> Result<Arc<Cell>> {
    let mut builder = Builder::new();
    builder.store_bit(false)?;
    builder.build()
}

fn is_empty_edge(cell: &Cell) -> bool {
    cell.bit_len() == 1 && cell.reference_count() == 0 && !bits::get_bit(cell.data(), 0)
}

/// Serializes a group of entries whose remaining keys are all `m` bits long
///
/// `entries` must be sorted by key. Recursion depth is bounded by the key width.
fn serialize_edge(entries: &[(&[bool], &Arc<Cell>)], m: usize) -> Result<Arc<Cell>> {
    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        return empty_edge();
    };

    let prefix_len = first
        .0
        .iter()
        .zip(last.0.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let label = choose_label(&first.0[..prefix_len], m, entries.len());

    let mut edge = Builder::new();
    edge.store_bit_slice(&label.bits)?;

    if let [(_, value)] = entries {
        // hmn_leaf
        edge.store_cell(value)?;
        return edge.build();
    }

    // hmn_fork: remaining keys split on the next bit
    let fork_at = label.covers;
    let rest = m - fork_at - 1;
    let (left, right): (Vec<_>, Vec<_>) = entries
        .iter()
        .map(|(key, value)| (key[fork_at], (&key[fork_at + 1..], *value)))
        .partition(|(bit, _)| !*bit);
    let left: Vec<_> = left.into_iter().map(|(_, entry)| entry).collect();
    let right: Vec<_> = right.into_iter().map(|(_, entry)| entry).collect();

    edge.store_ref(serialize_edge(&left, rest)?)?;
    if !right.is_empty() {
        edge.store_ref(serialize_edge(&right, rest)?)?;
    }
    edge.build()
}

/// Reads an edge label given `m` unresolved key bits
fn load_label(slice: &mut Slice, m: usize) -> Result<Vec<bool>> {
    let label = if !slice.load_bit()? {
        // hml_short
        let mut len = 0;
        while slice.load_bit()? {
            len += 1;
            if len > m {
                return Err(format_err!("Short label longer than {} remaining key bits", m));
            }
        }
        load_bit_vec(slice, len)?
    } else if !slice.load_bit()? {
        // hml_long
        let len = slice.load_uint(len_bits(m))? as usize;
        check_label_len(len, m)?;
        load_bit_vec(slice, len)?
    } else {
        // hml_same
        let bit = slice.load_bit()?;
        let len = slice.load_uint(len_bits(m))? as usize;
        check_label_len(len, m)?;
        vec![bit; len]
    };
    Ok(label)
}

fn check_label_len(len: usize, m: usize) -> Result<()> {
    if len > m {
        return Err(format_err!(
            "Label length {} exceeds {} remaining key bits",
            len,
            m
        ));
    }
    Ok(())
}

fn load_bit_vec(slice: &mut Slice, len: usize) -> Result<Vec<bool>> {
    if len == 0 {
        return Ok(Vec::new());
    }
    Ok(bits::unpack_bits(&slice.load_bits(len)?, len))
}

/// TON Dictionary (Hashmap) with fixed-size keys
///
/// Entries are kept ordered by key; the cell tree is produced on demand by
/// [`Hashmap::build`] and is never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hashmap {
    /// Key size in bits
    key_size: usize,
    /// Entries keyed by their bit representation
    map: BTreeMap<Vec<bool>, Arc<Cell>>,
}

impl Hashmap {
    /// Creates a new dictionary with the specified key size
    pub fn new(key_size: usize) -> Self {
        Self {
            key_size,
            map: BTreeMap::new(),
        }
    }

    /// Returns the key size in bits
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Returns the number of entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Checks if the dictionary is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sets a value for a key, replacing any previous value
    pub fn set(&mut self, key: impl Into<DictKey>, value: Arc<Cell>) -> Result<&mut Self> {
        let key = key.into().to_bits(self.key_size)?;
        self.map.insert(key, value);
        Ok(self)
    }

    /// Gets a value by key
    pub fn get(&self, key: impl Into<DictKey>) -> Result<Option<&Arc<Cell>>> {
        let key = key.into().to_bits(self.key_size)?;
        Ok(self.map.get(&key))
    }

    /// Removes a key, returning its value
    pub fn remove(&mut self, key: impl Into<DictKey>) -> Result<Option<Arc<Cell>>> {
        let key = key.into().to_bits(self.key_size)?;
        Ok(self.map.remove(&key))
    }

    /// Iterates over entries in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&[bool], &Arc<Cell>)> {
        self.map.iter().map(|(key, value)| (key.as_slice(), value))
    }

    /// Serializes the dictionary into its root edge cell
    pub fn build(&self) -> Result<Arc<Cell>> {
        if self.map.is_empty() {
            return Err(CellError::EmptyMap);
        }

        let entries: Vec<_> = self.iter().collect();
        serialize_edge(&entries, self.key_size)
    }

    /// Reads a dictionary from its root edge cell
    pub fn parse(root: &Arc<Cell>, key_size: usize) -> Result<Self> {
        if is_empty_edge(root) {
            return Err(format_err!("Hashmap root cannot be an empty edge"));
        }

        let mut map = BTreeMap::new();
        let mut pending = vec![(root.clone(), Vec::with_capacity(key_size), key_size)];

        while let Some((cell, mut key, m)) = pending.pop() {
            if is_empty_edge(&cell) {
                continue;
            }

            let mut slice = cell.parse();
            let label = load_label(&mut slice, m)?;
            let rest = m - label.len();
            key.extend(label);

            if rest == 0 {
                map.insert(key, slice.load_remaining()?);
                continue;
            }

            if slice.remaining_bits() != 0 {
                return Err(format_err!(
                    "Hashmap fork has {} unexpected data bits",
                    slice.remaining_bits()
                ));
            }

            let children = slice.load_remaining_refs()?;
            if children.is_empty() || children.len() > 2 {
                return Err(format_err!(
                    "Hashmap fork must have 1 or 2 references, got {}",
                    children.len()
                ));
            }

            for (bit, child) in [false, true].into_iter().zip(children) {
                let mut child_key = key.clone();
                child_key.push(bit);
                pending.push((child, child_key, rest - 1));
            }
        }

        if map.is_empty() {
            return Err(format_err!("Hashmap holds no entries"));
        }

        Ok(Self { key_size, map })
    }
}

/// Dictionary that may be empty: a presence bit, then the root edge as a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashmapE {
    inner: Hashmap,
}

impl HashmapE {
    /// Creates a new empty dictionary with the specified key size
    pub fn new(key_size: usize) -> Self {
        Self {
            inner: Hashmap::new(key_size),
        }
    }

    /// Unwraps into the non-empty dictionary type
    pub fn into_inner(self) -> Hashmap {
        self.inner
    }

    /// Serializes into a cell holding the presence bit and the optional root reference
    pub fn build(&self) -> Result<Arc<Cell>> {
        let mut builder = Builder::new();
        if self.inner.is_empty() {
            builder.store_bit(false)?;
        } else {
            builder.store_bit(true)?;
            builder.store_ref(self.inner.build()?)?;
        }
        builder.build()
    }

    /// Reads a dictionary embedded in a slice, consuming the presence bit and reference
    ///
    /// On failure the slice is left untouched.
    pub fn parse(slice: &mut Slice, key_size: usize) -> Result<Self> {
        let mut probe = slice.clone();

        let dict = if probe.load_bit()? {
            if probe.remaining_refs() == 0 {
                return Err(format_err!("Bad size flag: dictionary marked present without a root"));
            }
            let root = probe.load_ref()?;
            Self::from(Hashmap::parse(&root, key_size)?)
        } else {
            Self::new(key_size)
        };

        *slice = probe;
        Ok(dict)
    }
}

impl From<Hashmap> for HashmapE {
    fn from(inner: Hashmap) -> Self {
        Self { inner }
    }
}

impl Deref for HashmapE {
    type Target = Hashmap;

    fn deref(&self) -> &Hashmap {
        &self.inner
    }
}

impl DerefMut for HashmapE {
    fn deref_mut(&mut self) -> &mut Hashmap {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn bits_of(s: &str) -> Vec<bool> {
        s.chars().map(|c| c == '1').collect()
    }

    fn value(tag: u64) -> Arc<Cell> {
        let mut builder = Builder::new();
        builder.store_uint(tag, 16).unwrap();
        builder.build().unwrap()
    }

    fn key_to_uint(key: &[bool]) -> u64 {
        key.iter().fold(0, |acc, bit| (acc << 1) | *bit as u64)
    }

    fn assert_round_trip(dict: &Hashmap) {
        let root = dict.build().unwrap();
        let parsed = Hashmap::parse(&root, dict.key_size()).unwrap();
        assert_eq!(&parsed, dict);

        // rebuilding the parsed map is canonical
        assert_eq!(parsed.build().unwrap().hash(), root.hash());
    }

    #[test]
    fn test_empty_hashmap_is_error() {
        assert!(matches!(Hashmap::new(8).build(), Err(CellError::EmptyMap)));
    }

    #[test]
    fn test_empty_hashmap_e() {
        let dict = HashmapE::new(32);
        let cell = dict.build().unwrap();
        assert_eq!(cell.bit_len(), 1);
        assert_eq!(cell.reference_count(), 0);
        assert!(!cell.bits()[0]);

        let mut slice = cell.parse();
        let parsed = HashmapE::parse(&mut slice, 32).unwrap();
        assert!(parsed.is_empty());
        assert!(slice.is_empty());
    }

    #[test]
    fn test_single_key_uses_long_label() {
        let mut value_builder = Builder::new();
        value_builder.store_uint(0b1010, 4).unwrap();

        let mut dict = Hashmap::new(8);
        dict.set(0xFFu64, value_builder.build().unwrap()).unwrap();
        let root = dict.build().unwrap();

        // 10 | 1000 | 11111111 | 1010
        assert_eq!(root.bits(), bits_of("101000111111111010"));
        assert_eq!(root.reference_count(), 0);
        assert_round_trip(&dict);
    }

    #[test]
    fn test_two_keys_use_same_label() {
        let mut dict = Hashmap::new(8);
        dict.set(0u64, value(0xAAAA)).unwrap();
        dict.set(1u64, value(0xBBBB)).unwrap();
        let root = dict.build().unwrap();

        // common prefix 0000000: hml_same 11 | 0 | 0111
        assert_eq!(root.bits(), bits_of("1100111"));
        assert_eq!(root.reference_count(), 2);

        // no key bits left below the fork: empty short label 00, then the value
        let left = root.reference(0).unwrap();
        assert_eq!(left.bit_len(), 18);
        assert_eq!(left.parse().load_uint(18).unwrap(), 0xAAAA);

        assert_round_trip(&dict);
    }

    #[test]
    fn test_get_set_remove() {
        let mut dict = Hashmap::new(16);
        dict.set(7u64, value(1)).unwrap();
        dict.set(7u64, value(2)).unwrap();
        dict.set(300u64, value(3)).unwrap();

        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(7u64).unwrap(), Some(&value(2)));
        assert_eq!(dict.remove(300u64).unwrap(), Some(value(3)));
        assert_eq!(dict.get(300u64).unwrap(), None);
        assert!(matches!(dict.set(1u64 << 16, value(0)), Err(CellError::Range(_))));
    }

    #[test]
    fn test_signed_keys() {
        let mut dict = Hashmap::new(8);
        for key in [-128i64, -1, 0, 1, 127] {
            dict.set(key, value(key as u64 & 0xFFFF)).unwrap();
        }
        assert!(matches!(dict.set(128i64, value(0)), Err(CellError::Range(_))));

        let keys: Vec<u64> = dict.iter().map(|(key, _)| key_to_uint(key)).collect();
        assert_eq!(keys, vec![0x00, 0x01, 0x7F, 0x80, 0xFF]);
        assert_round_trip(&dict);
    }

    #[test]
    fn test_address_keys() {
        let mut dict = Hashmap::new(Address::STD_BITS);
        dict.set(Address::new(0, [1u8; 32]), value(1)).unwrap();
        dict.set(Address::new(-1, [2u8; 32]), value(2)).unwrap();

        assert_eq!(
            dict.get(Address::new(-1, [2u8; 32])).unwrap(),
            Some(&value(2))
        );
        assert_round_trip(&dict);

        let mut wrong = Hashmap::new(256);
        assert!(matches!(
            wrong.set(Address::new(0, [0u8; 32]), value(0)),
            Err(CellError::Range(_))
        ));
    }

    #[test]
    fn test_shared_prefix_keys() {
        let mut dict = Hashmap::new(32);
        for i in 0..20u64 {
            dict.set(0xABCD_0000 | i, value(i)).unwrap();
        }
        assert_round_trip(&dict);
    }

    #[test]
    fn test_disjoint_prefix_keys() {
        let mut dict = Hashmap::new(32);
        for i in 0..16u64 {
            dict.set(i << 28 | 0x0123_4567 & 0x0FFF_FFFF, value(i)).unwrap();
        }
        assert_round_trip(&dict);
    }

    #[test]
    fn test_random_key_sets() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for key_size in [1usize, 5, 16, 64, 100] {
            let mut dict = Hashmap::new(key_size);
            for i in 0..rng.gen_range(1..60u64) {
                let key: Vec<bool> = (0..key_size).map(|_| rng.gen_bool(0.5)).collect();
                dict.set(key.as_slice(), value(i)).unwrap();
            }
            assert_round_trip(&dict);
        }
    }

    #[test]
    fn test_accepts_explicit_empty_left_edge() {
        let leaf = |label: &str| {
            let mut builder = Builder::new();
            builder.store_bit_slice(&bits_of(label)).unwrap();
            builder.store_cell(&value(9)).unwrap();
            builder.build().unwrap()
        };

        // root: empty short label, left edge empty, right edge holds key bit 1
        let mut root = Builder::new();
        root.store_bit_slice(&bits_of("00")).unwrap();
        root.store_ref(empty_edge().unwrap()).unwrap();
        root.store_ref(leaf("0101")).unwrap();
        let parsed = Hashmap::parse(&root.build().unwrap(), 2).unwrap();
        let keys: Vec<Vec<bool>> = parsed.iter().map(|(key, _)| key.to_vec()).collect();
        assert_eq!(keys, vec![bits_of("11")]);

        // a fork with a single left reference
        let mut root = Builder::new();
        root.store_bit_slice(&bits_of("00")).unwrap();
        root.store_ref(leaf("0101")).unwrap();
        let parsed = Hashmap::parse(&root.build().unwrap(), 2).unwrap();
        assert_eq!(parsed.get(DictKey::Uint(0b01)).unwrap(), Some(&value(9)));
    }

    #[test]
    fn test_bad_labels() {
        // short label claiming 3 bits of a 2-bit key
        let mut builder = Builder::new();
        builder.store_bit_slice(&bits_of("01110")).unwrap();
        let cell = builder.build().unwrap();
        assert!(matches!(Hashmap::parse(&cell, 2), Err(CellError::Format(_))));

        // long label of length 3 for a 2-bit key
        let mut builder = Builder::new();
        builder.store_bit_slice(&bits_of("1011")).unwrap();
        let cell = builder.build().unwrap();
        assert!(matches!(Hashmap::parse(&cell, 2), Err(CellError::Format(_))));

        // fork with no children
        let mut builder = Builder::new();
        builder.store_bit_slice(&bits_of("00")).unwrap();
        let cell = builder.build().unwrap();
        assert!(matches!(Hashmap::parse(&cell, 2), Err(CellError::Format(_))));
    }

    #[test]
    fn test_bad_size_flag() {
        let mut builder = Builder::new();
        builder.store_bit(true).unwrap();
        let mut slice = builder.to_slice().unwrap();
        assert!(matches!(
            HashmapE::parse(&mut slice, 8),
            Err(CellError::Format(_))
        ));
        assert_eq!(slice.remaining_bits(), 1);
    }

    #[test]
    fn test_embedded_dict() {
        let mut dict = HashmapE::new(32);
        dict.set(42u64, value(42)).unwrap();
        dict.set(4242u64, value(4242)).unwrap();

        let mut builder = Builder::new();
        builder.store_u32(0xDEADBEEF).unwrap();
        builder.store_dict(&dict).unwrap();
        builder.store_uint(0b11, 2).unwrap();
        let mut slice = builder.to_slice().unwrap();

        assert_eq!(slice.load_u32().unwrap(), 0xDEADBEEF);
        assert_eq!(slice.preload_dict(32).unwrap(), dict);
        let loaded = slice.load_dict(32).unwrap();
        assert_eq!(loaded.get(4242u64).unwrap(), Some(&value(4242)));
        assert_eq!(slice.load_uint(2).unwrap(), 0b11);
        assert!(slice.is_empty());
    }
}
