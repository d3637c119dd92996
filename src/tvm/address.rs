//! Standard internal addresses
//!
//! An [`Address`] is a workchain plus a 256-bit account id. It renders either
//! raw (`wc:hex`) or as the 48-character user-friendly string: one tag byte,
//! the workchain byte, the account id and a big-endian CRC16, base64 encoded.

use crate::crc::CRC16;
use crate::tvm::error::{CellError, Result, format_err};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use std::fmt;
use std::str::FromStr;

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TEST_ONLY: u8 = 0x80;

const FRIENDLY_LEN: usize = 36;

/// `addr_std` without anycast, plus the user-friendly rendering flags
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub workchain: i8,
    pub hash_part: [u8; 32],
    /// Only affects the user-friendly form
    pub is_bounceable: bool,
    /// Only affects the user-friendly form
    pub is_test_only: bool,
}

impl Address {
    /// Serialized size of `addr_std$10 anycast:0 workchain:int8 hash:bits256`
    pub const STD_BITS: usize = 267;

    /// Bounceable, production-network address
    pub fn new(workchain: i8, hash_part: [u8; 32]) -> Self {
        Self {
            workchain,
            hash_part,
            is_bounceable: true,
            is_test_only: false,
        }
    }

    pub fn with_bounceable(mut self, bounceable: bool) -> Self {
        self.is_bounceable = bounceable;
        self
    }

    pub fn with_test_only(mut self, test_only: bool) -> Self {
        self.is_test_only = test_only;
        self
    }

    /// Parses the raw `workchain:hex` form
    pub fn from_raw(address: &str) -> Result<Self> {
        let (workchain, account) = address
            .split_once(':')
            .ok_or_else(|| format_err!("Invalid raw address '{}': expected wc:hash", address))?;

        let workchain = workchain
            .parse::<i8>()
            .map_err(|e| format_err!("Invalid workchain '{}': {}", workchain, e))?;

        if account.len() != 64 {
            return Err(format_err!(
                "Account id must be 64 hex characters, got {}",
                account.len()
            ));
        }
        let mut hash_part = [0u8; 32];
        hex::decode_to_slice(account, &mut hash_part)
            .map_err(|e| format_err!("Invalid account id: {}", e))?;

        Ok(Self::new(workchain, hash_part))
    }

    /// Parses the user-friendly form in either base64 alphabet
    pub fn from_friendly(address: &str) -> Result<Self> {
        let decoded = URL_SAFE_NO_PAD
            .decode(address)
            .or_else(|_| STANDARD.decode(address))
            .map_err(|e| format_err!("Invalid base64 address: {}", e))?;

        let raw: [u8; FRIENDLY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            format_err!(
                "User-friendly address must be {} bytes, got {}",
                FRIENDLY_LEN,
                decoded.len()
            )
        })?;

        let (body, crc) = raw.split_at(FRIENDLY_LEN - 2);
        let stored = u16::from_be_bytes([crc[0], crc[1]]);
        let computed = CRC16.checksum(body);
        if stored != computed {
            return Err(format_err!(
                "Address checksum mismatch: stored {:04x}, computed {:04x}",
                stored,
                computed
            ));
        }

        let is_bounceable = match body[0] & !TAG_TEST_ONLY {
            TAG_BOUNCEABLE => true,
            TAG_NON_BOUNCEABLE => false,
            other => return Err(format_err!("Invalid address tag: {:#04x}", other)),
        };

        let mut hash_part = [0u8; 32];
        hash_part.copy_from_slice(&body[2..]);

        Ok(Self::new(body[1] as i8, hash_part)
            .with_bounceable(is_bounceable)
            .with_test_only(body[0] & TAG_TEST_ONLY != 0))
    }

    /// `workchain:hex`, lower-case
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash_part))
    }

    fn friendly_bytes(&self) -> [u8; FRIENDLY_LEN] {
        let mut tag = if self.is_bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if self.is_test_only {
            tag |= TAG_TEST_ONLY;
        }

        let mut raw = [0u8; FRIENDLY_LEN];
        raw[0] = tag;
        raw[1] = self.workchain as u8;
        raw[2..34].copy_from_slice(&self.hash_part);
        let crc = CRC16.checksum(&raw[..34]);
        raw[34..].copy_from_slice(&crc.to_be_bytes());
        raw
    }

    /// User-friendly form using this address's own flags
    pub fn to_friendly(&self, url_safe: bool) -> String {
        let raw = self.friendly_bytes();
        if url_safe {
            URL_SAFE_NO_PAD.encode(raw)
        } else {
            STANDARD.encode(raw)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly(true))
    }
}

impl FromStr for Address {
    type Err = CellError;

    /// Accepts both the raw and the user-friendly forms
    fn from_str(s: &str) -> Result<Self> {
        if s.contains(':') {
            Self::from_raw(s)
        } else {
            Self::from_friendly(s)
        }
    }
}
