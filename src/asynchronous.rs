//! Async mirror of the [blocking](crate::blocking) driver, over the
//! `embedded-hal-async` traits. Control lines stay on the blocking
//! [`OutputPin`] trait; all waiting is an awaited delay, never a busy
//! block of the executor.

use crate::{
    check_write,
    command::Command,
    error::Error,
    page::PageSegments,
    register::{BlockProtect, StatusRegister},
    Config, WIP_POLL_INTERVAL_MS, WRITE_RETRY_DELAY_MS,
};
use bit::BitIndex;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::{delay::DelayNs, spi::SpiBus};

/// Type alias for the AsyncM95160
pub type AsyncM95160<SPI, CS, WP, HOLD, D> = AsyncM95<0x07FF, 32, SPI, CS, WP, HOLD, D>;

/// Type alias for the AsyncM95320
pub type AsyncM95320<SPI, CS, WP, HOLD, D> = AsyncM95<0x0FFF, 32, SPI, CS, WP, HOLD, D>;

/// Type alias for the AsyncM95640
pub type AsyncM95640<SPI, CS, WP, HOLD, D> = AsyncM95<0x1FFF, 32, SPI, CS, WP, HOLD, D>;

/// Type alias for the AsyncM95128
pub type AsyncM95128<SPI, CS, WP, HOLD, D> = AsyncM95<0x3FFF, 64, SPI, CS, WP, HOLD, D>;

/// Type alias for the AsyncM95256
pub type AsyncM95256<SPI, CS, WP, HOLD, D> = AsyncM95<0x7FFF, 64, SPI, CS, WP, HOLD, D>;

/// Type alias for the AsyncM95512
pub type AsyncM95512<SPI, CS, WP, HOLD, D> = AsyncM95<0xFFFF, 128, SPI, CS, WP, HOLD, D>;

/// The generic async M95 driver, parameterized by the highest valid
/// address and the page size in bytes.
pub struct AsyncM95<const SIZE: u32, const PAGE: usize, SPI, CS, WP, HOLD, D> {
    spi: SPI,
    cs: CS,
    wp: WP,
    hold: HOLD,
    delay: D,
    config: Config,
}

impl<const SIZE: u32, const PAGE: usize, SPI, CS, WP, HOLD, D, E, P>
    AsyncM95<SIZE, PAGE, SPI, CS, WP, HOLD, D>
where
    SPI: SpiBus<Error = E>,
    CS: OutputPin<Error = P>,
    WP: OutputPin<Error = P>,
    HOLD: OutputPin<Error = P>,
    D: DelayNs,
{
    /// Addressable capacity in bytes
    pub const fn capacity() -> usize {
        SIZE as usize + 1
    }

    /// Create a new instance with the default [`Config`]. The chip select,
    /// write protect and hold lines are driven to their inactive levels.
    pub fn new(spi: SPI, cs: CS, wp: WP, hold: HOLD, delay: D) -> Result<Self, Error<E, P>> {
        Self::with_config(spi, cs, wp, hold, delay, Config::default())
    }

    /// Create a new instance with an explicit [`Config`]
    pub fn with_config(
        spi: SPI,
        cs: CS,
        wp: WP,
        hold: HOLD,
        delay: D,
        config: Config,
    ) -> Result<Self, Error<E, P>> {
        let mut m95 = Self {
            spi,
            cs,
            wp,
            hold,
            delay,
            config,
        };
        m95.deselect()?;
        m95.unprotect()?;
        m95.resume()?;
        Ok(m95)
    }

    /// Destroy the driver and release the owned resources
    pub fn release(self) -> (SPI, CS, WP, HOLD, D) {
        (self.spi, self.cs, self.wp, self.hold, self.delay)
    }

    /// Write n bytes starting at an arbitrary address, split into
    /// page-bounded write cycles; the first failed cycle aborts the
    /// remainder, leaving earlier segments written.
    pub async fn write_buffer(&mut self, addr: u16, buff: &[u8]) -> Result<(), Error<E, P>> {
        check_write(Self::capacity(), addr, buff.len())?;
        #[cfg(feature = "defmt")]
        defmt::trace!("write {=usize} bytes at {=u16:#x}", buff.len(), addr);
        for segment in PageSegments::new(addr, buff.len(), PAGE) {
            self.write_page(
                segment.addr,
                &buff[segment.offset..segment.offset + segment.len],
            )
            .await?;
        }
        Ok(())
    }

    /// Perform one page-bounded write cycle. `buff` must fit the page
    /// containing `addr`; [`Self::write_buffer`] takes care of that for
    /// arbitrary requests.
    pub async fn write_page(&mut self, addr: u16, buff: &[u8]) -> Result<(), Error<E, P>> {
        debug_assert!(buff.len() <= PAGE);
        self.spi.flush().await.map_err(Error::Spi)?;
        self.write_enable().await?;

        let header = [Command::Write as u8, (addr >> 8) as u8, addr as u8];
        self.select()?;
        let mut res = self.send_instruction(&header).await;
        if res.is_ok() {
            res = self
                .transmit_with_retry(buff, self.config.write_attempts, WRITE_RETRY_DELAY_MS)
                .await;
        }
        self.deselect()?;

        // The cycle is always wound down; the transmit outcome wins.
        let wait = self.wait_ready().await;
        let disable = self.write_disable().await;
        res.and(wait).and(disable)
    }

    /// Read n bytes starting at an address. Reads stream sequentially
    /// across page boundaries.
    pub async fn read_buffer(&mut self, addr: u16, buff: &mut [u8]) -> Result<(), Error<E, P>> {
        check_write(Self::capacity(), addr, buff.len())?;
        self.spi.flush().await.map_err(Error::Spi)?;

        let header = [Command::Read as u8, (addr >> 8) as u8, addr as u8];
        self.select()?;
        let mut res = self.send_instruction(&header).await;
        if res.is_ok() {
            res = match self.spi.read(buff).await {
                Err(e) if self.config.strict => Err(Error::Spi(e)),
                _ => Ok(()),
            };
        }
        self.deselect()?;
        res
    }

    /// Poll the status register until the running write cycle completes, at
    /// most [`Config::poll_limit`] times.
    pub async fn wait_ready(&mut self) -> Result<(), Error<E, P>> {
        self.select()?;
        let res = self.poll_until_idle().await;
        self.deselect()?;
        res
    }

    // CS stays low for the whole poll: the device keeps shifting out the
    // status register while selected.
    async fn poll_until_idle(&mut self) -> Result<(), Error<E, P>> {
        self.send_instruction(&[Command::ReadStatus as u8]).await?;
        for _ in 0..self.config.poll_limit {
            let mut status = [0u8; 1];
            match self.spi.read(&mut status).await {
                Ok(()) => {
                    if !StatusRegister::from(status[0]).write_in_progress {
                        return Ok(());
                    }
                }
                Err(e) if self.config.strict => return Err(Error::Spi(e)),
                // the historical driver reports a failed status read as idle
                Err(_) => return Ok(()),
            }
            self.delay.delay_ms(WIP_POLL_INTERVAL_MS).await;
        }
        #[cfg(feature = "defmt")]
        defmt::error!("device busy past the poll limit");
        Err(Error::Timeout)
    }

    /// Check the WIP bit, true while a write cycle is running
    pub async fn is_busy(&mut self) -> Result<bool, Error<E, P>> {
        Ok(self.read_status().await?.write_in_progress)
    }

    /// Set the write enable latch
    pub async fn write_enable(&mut self) -> Result<(), Error<E, P>> {
        self.command_write(&[Command::WriteEnable as u8]).await
    }

    /// Reset the write enable latch
    pub async fn write_disable(&mut self) -> Result<(), Error<E, P>> {
        self.command_write(&[Command::WriteDisable as u8]).await
    }

    /// Read the status register
    pub async fn read_status(&mut self) -> Result<StatusRegister, Error<E, P>> {
        let mut command: [u8; 2] = [Command::ReadStatus as u8, 0];
        self.command_transfer(&mut command).await?;
        Ok(command[1].into())
    }

    /// Write a raw value to the status register. Write enable and disable
    /// are handled internally.
    pub async fn write_status(&mut self, value: u8) -> Result<(), Error<E, P>> {
        self.write_enable().await?;
        self.command_write(&[Command::WriteStatus as u8, value])
            .await?;
        self.write_disable().await
    }

    /// Select the write protected portion of the array
    pub async fn set_block_protect(&mut self, level: BlockProtect) -> Result<(), Error<E, P>> {
        let mut value = u8::from(self.read_status().await?);
        value.set_bit_range(2..4, level.into());
        self.write_status(value).await
    }

    /// Transmit raw instruction bytes on the bus. Chip select is not
    /// touched; compose with [`Self::select`] and [`Self::deselect`].
    pub async fn send_instruction(&mut self, instruction: &[u8]) -> Result<(), Error<E, P>> {
        self.spi.write(instruction).await.map_err(Error::Spi)
    }

    // Bounded retry for the payload transmit of a write cycle; success
    // short-circuits and the last error is carried out of the final
    // attempt.
    async fn transmit_with_retry(
        &mut self,
        bytes: &[u8],
        attempts: u8,
        delay_ms: u32,
    ) -> Result<(), Error<E, P>> {
        let attempts = attempts.max(1);
        let mut res = Ok(());
        for attempt in 0..attempts {
            res = self.spi.write(bytes).await.map_err(Error::Spi);
            if res.is_ok() {
                break;
            }
            if attempt + 1 < attempts {
                self.delay.delay_ms(delay_ms).await;
            }
        }
        res
    }

    // One framed command: select, write, deselect.
    async fn command_write(&mut self, bytes: &[u8]) -> Result<(), Error<E, P>> {
        self.select()?;
        let res = self.send_instruction(bytes).await;
        self.deselect()?;
        res
    }

    // One framed full-duplex transfer, used for status reads.
    async fn command_transfer(&mut self, bytes: &mut [u8]) -> Result<(), Error<E, P>> {
        self.select()?;
        let res = self.spi.transfer_in_place(bytes).await.map_err(Error::Spi);
        self.deselect()?;
        res
    }

    /// Drive chip select low
    pub fn select(&mut self) -> Result<(), Error<E, P>> {
        self.cs.set_low().map_err(Error::Pin)
    }

    /// Drive chip select high
    pub fn deselect(&mut self) -> Result<(), Error<E, P>> {
        self.cs.set_high().map_err(Error::Pin)
    }

    /// Assert the write protect line (active low)
    pub fn protect(&mut self) -> Result<(), Error<E, P>> {
        self.wp.set_low().map_err(Error::Pin)
    }

    /// Release the write protect line
    pub fn unprotect(&mut self) -> Result<(), Error<E, P>> {
        self.wp.set_high().map_err(Error::Pin)
    }

    /// Assert the hold line (active low), pausing the serial interface
    pub fn hold(&mut self) -> Result<(), Error<E, P>> {
        self.hold.set_low().map_err(Error::Pin)
    }

    /// Release the hold line, resuming the serial interface
    pub fn resume(&mut self) -> Result<(), Error<E, P>> {
        self.hold.set_high().map_err(Error::Pin)
    }
}
