//! PCA9539-style 16-bit I/O expanders, organized as two 8-bit banks. Each register kind has one
//! register per bank, bank 1 immediately following bank 0.

use super::Error;
use crate::{
    i2c::{
        self,
        I2cDevice,
    },
    transport::Transport,
};

const INPUT: u8 = 0;
const OUTPUT: u8 = 2;
const INVERSION: u8 = 4;
/// A set bit makes the pin an input
const CONFIG: u8 = 6;

const BANKS: u8 = 2;
const CHANNELS: u8 = 8;

#[derive(Debug)]
pub struct IoExpander<'a, T> {
    device: I2cDevice<'a, T>,
}

fn register(base: u8, bank: u8) -> Result<u8, Error> {
    if bank >= BANKS {
        return Err(Error::InvalidBank(bank));
    }
    Ok(base + bank)
}

impl<'a, T> IoExpander<'a, T>
where
    T: Transport,
{
    #[must_use]
    pub fn new(device: I2cDevice<'a, T>) -> Self {
        Self { device }
    }

    /// Set the input polarity inversion mask of `bank`
    /// # Errors
    /// Returns an error on an invalid bank or bus failure
    pub fn set_inversion(&self, bank: u8, mask: u8) -> Result<(), Error> {
        Ok(self.device.write_register(register(INVERSION, bank)?, mask)?)
    }

    /// Set the direction of every pin in `bank`, a set bit makes that pin an input
    /// # Errors
    /// Returns an error on an invalid bank or bus failure
    pub fn set_io(&self, bank: u8, inputs: u8) -> Result<(), Error> {
        Ok(self.device.write_register(register(CONFIG, bank)?, inputs)?)
    }

    /// Drive every output of `bank`
    /// # Errors
    /// Returns an error on an invalid bank or bus failure
    pub fn set_outputs(&self, bank: u8, levels: u8) -> Result<(), Error> {
        Ok(self.device.write_register(register(OUTPUT, bank)?, levels)?)
    }

    /// Drive one output, leaving the others in the bank untouched
    /// # Errors
    /// Returns an error on an invalid bank or channel, or bus failure
    pub fn set_output(&self, bank: u8, channel: u8, level: bool) -> Result<(), Error> {
        let reg = register(OUTPUT, bank)?;
        if channel >= CHANNELS {
            return Err(Error::InvalidChannel(channel));
        }
        // Read-modify-write under one lock so nobody else's update is lost
        Ok(self.device.with_bus(|bus, address| -> Result<(), i2c::Error> {
            let current = bus.read_array(address, reg, 1)?[0];
            let next = if level {
                current | (1 << channel)
            } else {
                current & !(1 << channel)
            };
            bus.write_array(address, reg, &[next], true)
        })?)
    }

    /// Logic levels on the pins of `bank`, after polarity inversion
    /// # Errors
    /// Returns an error on an invalid bank or bus failure
    pub fn read_inputs(&self, bank: u8) -> Result<u8, Error> {
        Ok(self.device.read_register(register(INPUT, bank)?)?)
    }

    /// The output levels last written to `bank`
    /// # Errors
    /// Returns an error on an invalid bank or bus failure
    pub fn read_outputs(&self, bank: u8) -> Result<u8, Error> {
        Ok(self.device.read_register(register(OUTPUT, bank)?)?)
    }

    /// The pin directions of `bank`
    /// # Errors
    /// Returns an error on an invalid bank or bus failure
    pub fn read_io_config(&self, bank: u8) -> Result<u8, Error> {
        Ok(self.device.read_register(register(CONFIG, bank)?)?)
    }
}
