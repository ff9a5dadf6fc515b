//! The Si534x family of jitter-attenuating clock synthesizers (Si5344, Si5345, ...).
//!
//! These chips have a 16-bit register space reached through 8-bit I2C sub-registers: the high
//! byte of an address is selected by writing the page register (`0x01`, present on every page)
//! and the low byte is the sub-register within that page. Other handles (and the chip's own soft
//! reset) can move the page at any time, so the page is read back from the chip before every
//! access rather than remembered.

use super::Error;
use crate::{
    i2c::{
        self,
        I2cDevice,
    },
    transport::Transport,
    upload::{
        self,
        Dialect,
        RegisterWriter,
        UploadOutcome,
        UploadPolicy,
    },
};
use std::path::Path;
use tracing::{
    debug,
    trace,
};

const PAGE_REGISTER: u8 = 0x01;
/// Two bytes, little-endian, BCD part number (e.g. `0x5345`)
const PART_NUMBER: u16 = 0x0002;
/// Eight ASCII bytes set by the configuration tool
const DESIGN_ID: u16 = 0x026B;
const DESIGN_ID_LEN: usize = 8;

/// A Si534x clock synthesizer
#[derive(Debug)]
pub struct Si534x<'a, T> {
    device: I2cDevice<'a, T>,
}

impl<'a, T> Si534x<'a, T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(device: I2cDevice<'a, T>) -> Self {
        Self { device }
    }

    #[must_use]
    pub fn device(&self) -> &I2cDevice<'a, T> {
        &self.device
    }

    /// Run `f` on the bus with the chip switched to `page`. The page check, the switch and `f`
    /// all happen under one bus lock.
    fn on_page<O, F>(&self, page: u8, f: F) -> Result<O, i2c::Error>
    where
        F: FnOnce(&mut i2c::I2cBus<T>, u8) -> Result<O, i2c::Error>,
    {
        self.device.with_bus(|bus, slave| {
            let current = bus.read_array(slave, PAGE_REGISTER, 1)?[0];
            if current != page {
                trace!(slave, from = current, to = page, "Switching Si534x page");
                bus.write_array(slave, PAGE_REGISTER, &[page], true)?;
            }
            f(bus, slave)
        })
    }

    /// Write one register of the 16-bit register space
    /// # Errors
    /// Returns an error on bus failure
    pub fn write_clock_register(&mut self, address: u16, value: u8) -> Result<(), Error> {
        let [page, register] = address.to_be_bytes();
        Ok(self.on_page(page, |bus, slave| {
            bus.write_array(slave, register, &[value], true)
        })?)
    }

    /// Read one register of the 16-bit register space
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_clock_register(&mut self, address: u16) -> Result<u8, Error> {
        Ok(self.read_clock_registers(address, 1)?[0])
    }

    /// Read `n` consecutive registers, which may span pages
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_clock_registers(&mut self, address: u16, n: usize) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(n);
        let mut next = address;
        while bytes.len() < n {
            let [page, register] = next.to_be_bytes();
            let chunk = (n - bytes.len()).min(0x100 - usize::from(register));
            bytes.extend(self.on_page(page, |bus, slave| bus.read_array(slave, register, chunk))?);
            next = next.wrapping_add(u16::try_from(chunk).unwrap_or(u16::MAX));
        }
        Ok(bytes)
    }

    /// Read the part number, e.g. `0x5345` for a Si5345
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_device_version(&mut self) -> Result<u16, Error> {
        let bytes = self.read_clock_registers(PART_NUMBER, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read the design identifier the loaded configuration was tagged with
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_config_id(&mut self) -> Result<String, Error> {
        let bytes = self.read_clock_registers(DESIGN_ID, DESIGN_ID_LEN)?;
        Ok(String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_owned())
    }

    /// Upload a sectioned register export to the chip
    /// # Errors
    /// Returns an error if the file can't be read or parsed, or (in strict mode) if any register
    /// failed to write
    pub fn configure(&mut self, path: &Path, policy: &UploadPolicy) -> Result<UploadOutcome, Error> {
        debug!(path = %path.display(), address = self.device.address(), "Configuring Si534x");
        Ok(upload::upload_file(self, path, Dialect::Sectioned, policy)?)
    }

    /// Upload a sectioned register export held in memory
    /// # Errors
    /// Returns an error if parsing fails, or (in strict mode) if any register failed to write
    pub fn configure_str(
        &mut self,
        contents: &str,
        policy: &UploadPolicy,
    ) -> Result<UploadOutcome, Error> {
        Ok(upload::upload_str(self, contents, Dialect::Sectioned, policy)?)
    }
}

impl<'a, T> RegisterWriter for Si534x<'a, T>
where
    T: Transport,
{
    type Error = Error;

    fn write_register(&mut self, address: u16, value: u8) -> Result<(), Error> {
        self.write_clock_register(address, value)
    }
}
