use crc::{CRC_16_XMODEM, CRC_32_ISCSI, Crc};

/// CRC16 used by user-friendly addresses
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC32-C (Castagnoli) used by bag-of-cells checksums
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
