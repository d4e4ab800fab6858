//! In-memory model of an M95 part for host tests: an SPI bus, the chip
//! select and the two control lines all share one device state, mirroring
//! the wiring of the real chip.
//!
//! The model enforces the page-write semantics of the device: a write
//! cycle whose payload runs past the end of the addressed page wraps to
//! the start of that page instead of advancing, exactly the corruption the
//! driver's segmentation exists to prevent.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::digital;
use embedded_hal::spi;

pub const PAGE: usize = 32;
pub const CAPACITY: usize = 2048; // M95160

const WRSR: u8 = 0x01;
const WRITE: u8 = 0x02;
const READ: u8 = 0x03;
const WRDI: u8 = 0x04;
const RDSR: u8 = 0x05;
const WREN: u8 = 0x06;

/// Transport fault injected by a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

impl spi::Error for BusFault {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

#[derive(Default)]
pub struct State {
    pub mem: Vec<u8>,
    selected: bool,
    wel: bool,
    status: u8,
    frame: Vec<u8>,
    read_addr: Option<usize>,
    busy_polls: u32,
    /// Status polls a committed write cycle reports WIP for
    pub busy_after_write: u32,
    /// Page write cycles seen (WRITE frames, committed or not)
    pub write_frames: u32,
    /// Individual payload transmit attempts
    pub payload_attempts: u32,
    /// Fail the payload transmit of cycle k (1-based) this many times
    pub fail_payload: Option<(u32, u32)>,
    /// Fail every bus receive
    pub fail_reads: bool,
    pub wp_level: bool,
    pub hold_level: bool,
}

impl State {
    fn cs_low(&mut self) {
        self.selected = true;
        self.frame.clear();
        self.read_addr = None;
    }

    fn cs_high(&mut self) {
        if !self.selected {
            return;
        }
        self.selected = false;
        self.execute_frame();
    }

    fn execute_frame(&mut self) {
        let Some(&op) = self.frame.first() else {
            return;
        };
        match op {
            WREN => self.wel = true,
            WRDI => self.wel = false,
            WRSR => {
                if self.frame.len() >= 2 && self.wel {
                    self.status = self.frame[1] & 0b1000_1100;
                }
                self.wel = false;
            }
            WRITE => {
                if self.frame.len() >= 3 {
                    if self.wel {
                        let addr =
                            u16::from_be_bytes([self.frame[1], self.frame[2]]) as usize;
                        // The internal write pointer wraps within the page.
                        for (i, &byte) in self.frame[3..].iter().enumerate() {
                            let page_start = addr & !(PAGE - 1);
                            let dest = page_start + ((addr & (PAGE - 1)) + i) % PAGE;
                            self.mem[dest % CAPACITY] = byte;
                        }
                        if self.frame.len() > 3 {
                            self.busy_polls = self.busy_after_write;
                        }
                    }
                    self.wel = false;
                    self.write_frames += 1;
                }
            }
            _ => {}
        }
    }

    fn bus_write(&mut self, words: &[u8]) -> Result<(), BusFault> {
        assert!(self.selected, "bus written while deselected");
        // a write after a complete WRITE header is the page payload
        if self.frame.first() == Some(&WRITE) && self.frame.len() >= 3 {
            self.payload_attempts += 1;
            if let Some((cycle, times)) = self.fail_payload {
                if self.write_frames + 1 == cycle && times > 0 {
                    self.fail_payload = Some((cycle, times - 1));
                    return Err(BusFault);
                }
            }
        }
        self.frame.extend_from_slice(words);
        if self.frame.first() == Some(&READ) && self.frame.len() >= 3 && self.read_addr.is_none()
        {
            self.read_addr =
                Some(u16::from_be_bytes([self.frame[1], self.frame[2]]) as usize);
        }
        Ok(())
    }

    fn bus_read(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
        assert!(self.selected, "bus read while deselected");
        if self.fail_reads {
            return Err(BusFault);
        }
        match self.frame.first() {
            Some(&RDSR) => {
                for word in words.iter_mut() {
                    let mut status = self.status;
                    if self.busy_polls > 0 {
                        self.busy_polls -= 1;
                        status |= 0x01;
                    }
                    if self.wel {
                        status |= 0x02;
                    }
                    *word = status;
                }
                Ok(())
            }
            Some(&READ) => {
                let mut addr = self.read_addr.expect("read before a complete READ header");
                for word in words.iter_mut() {
                    // sequential reads stream across page boundaries
                    *word = self.mem[addr % CAPACITY];
                    addr += 1;
                }
                self.read_addr = Some(addr);
                Ok(())
            }
            _ => {
                words.fill(0);
                Ok(())
            }
        }
    }
}

/// One simulated chip, handing out the bus and pin endpoints that the
/// driver takes ownership of.
pub struct Device(Rc<RefCell<State>>);

impl Device {
    pub fn new() -> Self {
        Device(Rc::new(RefCell::new(State {
            mem: vec![0xFF; CAPACITY],
            busy_after_write: 2,
            wp_level: true,
            hold_level: true,
            ..Default::default()
        })))
    }

    pub fn bus(&self) -> Bus {
        Bus(self.0.clone())
    }

    pub fn cs(&self) -> Pin {
        Pin {
            state: self.0.clone(),
            role: Role::Cs,
        }
    }

    pub fn wp(&self) -> Pin {
        Pin {
            state: self.0.clone(),
            role: Role::Wp,
        }
    }

    pub fn hold(&self) -> Pin {
        Pin {
            state: self.0.clone(),
            role: Role::Hold,
        }
    }

    pub fn state(&self) -> std::cell::RefMut<'_, State> {
        self.0.borrow_mut()
    }
}

pub struct Bus(Rc<RefCell<State>>);

impl spi::ErrorType for Bus {
    type Error = BusFault;
}

impl spi::SpiBus for Bus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
        self.0.borrow_mut().bus_read(words)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), BusFault> {
        self.0.borrow_mut().bus_write(words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), BusFault> {
        let mut state = self.0.borrow_mut();
        state.bus_write(write)?;
        state.bus_read(read)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
        let written = words.to_vec();
        let mut state = self.0.borrow_mut();
        state.bus_write(&written)?;
        state.bus_read(words)
    }

    fn flush(&mut self) -> Result<(), BusFault> {
        Ok(())
    }
}

impl embedded_hal_async::spi::SpiBus for Bus {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
        self.0.borrow_mut().bus_read(words)
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), BusFault> {
        self.0.borrow_mut().bus_write(words)
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), BusFault> {
        let mut state = self.0.borrow_mut();
        state.bus_write(write)?;
        state.bus_read(read)
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
        let written = words.to_vec();
        let mut state = self.0.borrow_mut();
        state.bus_write(&written)?;
        state.bus_read(words)
    }

    async fn flush(&mut self) -> Result<(), BusFault> {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Role {
    Cs,
    Wp,
    Hold,
}

pub struct Pin {
    state: Rc<RefCell<State>>,
    role: Role,
}

impl digital::ErrorType for Pin {
    type Error = core::convert::Infallible;
}

impl digital::OutputPin for Pin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        match self.role {
            Role::Cs => state.cs_low(),
            Role::Wp => state.wp_level = false,
            Role::Hold => state.hold_level = false,
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        match self.role {
            Role::Cs => state.cs_high(),
            Role::Wp => state.wp_level = true,
            Role::Hold => state.hold_level = true,
        }
        Ok(())
    }
}

pub struct NoopDelay;

impl embedded_hal::delay::DelayNs for NoopDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

impl embedded_hal_async::delay::DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// 0, 1, 2, ... test payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}
