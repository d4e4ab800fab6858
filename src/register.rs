use bit::BitIndex;

/// Decoded view of the status register.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct StatusRegister {
    /// Status register write disable, combines with the WP line to lock the
    /// block protect bits
    pub status_write_disable: bool,
    /// Block protect bits BP1:BP0
    pub block_protect: u8,
    /// Write enable latch, set by the write enable instruction
    pub write_enable_latch: bool,
    /// Write in progress, set while a write cycle runs
    pub write_in_progress: bool,
}

impl From<u8> for StatusRegister {
    fn from(val: u8) -> StatusRegister {
        StatusRegister {
            status_write_disable: val.bit(7),
            block_protect: val.bit_range(2..4),
            write_enable_latch: val.bit(1),
            write_in_progress: val.bit(0),
        }
    }
}

impl From<StatusRegister> for u8 {
    fn from(reg: StatusRegister) -> u8 {
        let mut val = 0u8;
        val.set_bit(7, reg.status_write_disable);
        val.set_bit_range(2..4, reg.block_protect);
        val.set_bit(1, reg.write_enable_latch);
        val.set_bit(0, reg.write_in_progress);
        val
    }
}

/// Write protected portion of the array, selected by the BP1:BP0 bits.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockProtect {
    /// The whole array is writable
    None,
    /// The upper quarter of the array is protected
    UpperQuarter,
    /// The upper half of the array is protected
    UpperHalf,
    /// The whole array is protected
    All,
}

impl From<u8> for BlockProtect {
    fn from(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => BlockProtect::None,
            0b01 => BlockProtect::UpperQuarter,
            0b10 => BlockProtect::UpperHalf,
            _ => BlockProtect::All,
        }
    }
}

impl From<BlockProtect> for u8 {
    fn from(bp: BlockProtect) -> u8 {
        match bp {
            BlockProtect::None => 0b00,
            BlockProtect::UpperQuarter => 0b01,
            BlockProtect::UpperHalf => 0b10,
            BlockProtect::All => 0b11,
        }
    }
}
