#![cfg_attr(not(test), no_std)]
//! This is a platform agnostic library for the ST M95 series SPI EEPROM using [embedded-hal](https://github.com/rust-embedded/embedded-hal).
//!
//! The driver owns the SPI bus, the chip select line and the two auxiliary
//! control lines (write protect, hold) of the device, plus a delay provider.
//! Writes of arbitrary length at arbitrary addresses are split into
//! page-bounded write cycles; see [`page`] for the segmentation rules.
//!
//! Multiple chips are supported through type aliases:
//! * [M95160](https://www.st.com/en/memories/m95160-w.html) — 2 KB, 32 B pages
//! * [M95320](https://www.st.com/en/memories/m95320-w.html) — 4 KB, 32 B pages
//! * [M95640](https://www.st.com/en/memories/m95640-w.html) — 8 KB, 32 B pages
//! * [M95128](https://www.st.com/en/memories/m95128-w.html) — 16 KB, 64 B pages
//! * [M95256](https://www.st.com/en/memories/m95256-w.html) — 32 KB, 64 B pages
//! * [M95512](https://www.st.com/en/memories/m95512-w.html) — 64 KB, 128 B pages

pub mod asynchronous;
pub mod blocking;
mod command;
pub mod error;
pub mod page;
pub mod register;

use crate::error::Error;

/// Delay between two payload transmit attempts, in milliseconds.
pub(crate) const WRITE_RETRY_DELAY_MS: u32 = 5;

/// Delay between two polls of the WIP bit, in milliseconds.
pub(crate) const WIP_POLL_INTERVAL_MS: u32 = 1;

/// Driver tuning knobs, fixed at construction.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Propagate transport faults from the read and status-wait paths.
    ///
    /// When `false` (the default) those paths report success regardless of
    /// the underlying receive outcome, matching the historical driver
    /// behavior this crate derives from. Faults in the write path are
    /// always propagated.
    pub strict: bool,
    /// Attempts for the payload transmit step of a page write cycle.
    pub write_attempts: u8,
    /// Maximum status-register polls before a write wait gives up with
    /// [`Error::Timeout`].
    pub poll_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict: false,
            write_attempts: 5,
            poll_limit: 1000,
        }
    }
}

pub(crate) fn check_write<S, P>(
    capacity: usize,
    addr: u16,
    length: usize,
) -> Result<(), Error<S, P>> {
    if length > capacity || addr as usize > capacity - length {
        return Err(Error::OutOfBounds);
    }
    Ok(())
}
