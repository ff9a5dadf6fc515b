//! SFP transceivers, per SFF-8472. The serial ID lives in the EEPROM at `0xA0` (7-bit `0x50`)
//! and the digital diagnostics at `0xA2` (7-bit `0x51`).

use super::Error;
use crate::{
    i2c::{
        I2cBus,
        I2cDevice,
    },
    transport::Transport,
};
use fixed::types::I8F8;
use packed_struct::prelude::*;
use std::sync::Mutex;
use timing_derive::address;

pub const SERIAL_ID_ADDRESS: u8 = 0x50;
pub const DIAGNOSTICS_ADDRESS: u8 = 0x51;

const VENDOR_NAME: u8 = 20;
const VENDOR_PN: u8 = 40;
const ID_STRING_LEN: usize = 16;

const TEMPERATURE: u8 = 96;
const VCC: u8 = 98;
const TX_BIAS: u8 = 100;
const TX_POWER: u8 = 102;
const RX_POWER: u8 = 104;

#[address(92)]
#[derive(PackedStruct, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct DiagnosticMonitoringType {
    #[packed_field(bits = "6")]
    pub ddm_implemented: bool,
    #[packed_field(bits = "5")]
    pub internally_calibrated: bool,
    #[packed_field(bits = "4")]
    pub externally_calibrated: bool,
    /// Received power is reported as an average rather than OMA
    #[packed_field(bits = "3")]
    pub rx_power_average: bool,
    #[packed_field(bits = "2")]
    pub address_change_required: bool,
}

#[address(110)]
#[derive(PackedStruct, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct StatusControl {
    /// State of the TX_DISABLE pin
    #[packed_field(bits = "7")]
    pub tx_disable_state: bool,
    #[packed_field(bits = "6")]
    pub soft_tx_disable: bool,
    #[packed_field(bits = "5")]
    pub rs1_state: bool,
    #[packed_field(bits = "4")]
    pub rate_select_state: bool,
    #[packed_field(bits = "3")]
    pub soft_rate_select: bool,
    #[packed_field(bits = "2")]
    pub tx_fault: bool,
    #[packed_field(bits = "1")]
    pub rx_los: bool,
    #[packed_field(bits = "0")]
    pub data_not_ready: bool,
}

/// One snapshot of the diagnostic monitors
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Diagnostics {
    /// Degrees C
    pub temperature: f64,
    /// Volts
    pub vcc: f64,
    /// Milliamps
    pub tx_bias: f64,
    /// Milliwatts
    pub tx_power: f64,
    /// Milliwatts
    pub rx_power: f64,
}

#[derive(Debug)]
pub struct Sfp<'a, T> {
    serial_id: I2cDevice<'a, T>,
    diagnostics: I2cDevice<'a, T>,
}

impl<'a, T> Sfp<'a, T>
where
    T: Transport,
{
    /// Bind both SFF-8472 pages of the module on `bus`
    /// # Errors
    /// Returns an error if the handles can't be created
    pub fn new(bus: &'a Mutex<I2cBus<T>>) -> Result<Self, Error> {
        Ok(Self {
            serial_id: I2cDevice::new(bus, SERIAL_ID_ADDRESS)?,
            diagnostics: I2cDevice::new(bus, DIAGNOSTICS_ADDRESS)?,
        })
    }

    /// Check if a module is plugged in
    #[must_use]
    pub fn present(&self) -> bool {
        self.serial_id.ping()
    }

    /// # Errors
    /// Returns an error on bus failure
    pub fn monitoring_type(&self) -> Result<DiagnosticMonitoringType, Error> {
        Ok(self.serial_id.read_reg()?)
    }

    /// Make sure the diagnostic words can be read and scaled directly
    /// # Errors
    /// Returns an error if the module has no internally calibrated diagnostics
    pub fn check_diagnostics(&self) -> Result<(), Error> {
        let kind = self.monitoring_type()?;
        if !kind.ddm_implemented {
            Err(Error::DdmUnsupported)
        } else if !kind.internally_calibrated {
            Err(Error::ExternalCalibration)
        } else {
            Ok(())
        }
    }

    fn read_word(&self, register: u8) -> Result<[u8; 2], Error> {
        let bytes = self.diagnostics.read_registers(register, 2)?;
        Ok([bytes[0], bytes[1]])
    }

    fn read_unsigned(&self, register: u8) -> Result<f64, Error> {
        Ok(f64::from(u16::from_be_bytes(self.read_word(register)?)))
    }

    fn read_string(&self, register: u8) -> Result<String, Error> {
        let bytes = self.serial_id.read_registers(register, ID_STRING_LEN)?;
        Ok(String::from_utf8_lossy(&bytes).trim_end().to_owned())
    }

    /// Internal temperature in degrees C
    /// # Errors
    /// Returns an error on bus failure
    pub fn temperature(&self) -> Result<f64, Error> {
        Ok(I8F8::from_be_bytes(self.read_word(TEMPERATURE)?).to_num())
    }

    /// Supply voltage in V
    /// # Errors
    /// Returns an error on bus failure
    pub fn vcc(&self) -> Result<f64, Error> {
        Ok(self.read_unsigned(VCC)? * 1e-4)
    }

    /// Laser bias current in mA
    /// # Errors
    /// Returns an error on bus failure
    pub fn tx_bias(&self) -> Result<f64, Error> {
        Ok(self.read_unsigned(TX_BIAS)? * 2e-3)
    }

    /// Transmitted optical power in mW
    /// # Errors
    /// Returns an error on bus failure
    pub fn tx_power(&self) -> Result<f64, Error> {
        Ok(self.read_unsigned(TX_POWER)? * 1e-4)
    }

    /// Received optical power in mW
    /// # Errors
    /// Returns an error on bus failure
    pub fn rx_power(&self) -> Result<f64, Error> {
        Ok(self.read_unsigned(RX_POWER)? * 1e-4)
    }

    /// Read every monitor, after checking the module reports calibrated values
    /// # Errors
    /// Returns an error on bus failure or if the diagnostics can't be interpreted
    pub fn diagnostics(&self) -> Result<Diagnostics, Error> {
        self.check_diagnostics()?;
        Ok(Diagnostics {
            temperature: self.temperature()?,
            vcc: self.vcc()?,
            tx_bias: self.tx_bias()?,
            tx_power: self.tx_power()?,
            rx_power: self.rx_power()?,
        })
    }

    /// # Errors
    /// Returns an error on bus failure
    pub fn vendor_name(&self) -> Result<String, Error> {
        self.read_string(VENDOR_NAME)
    }

    /// # Errors
    /// Returns an error on bus failure
    pub fn part_number(&self) -> Result<String, Error> {
        self.read_string(VENDOR_PN)
    }

    /// # Errors
    /// Returns an error on bus failure
    pub fn status(&self) -> Result<StatusControl, Error> {
        Ok(self.diagnostics.read_reg()?)
    }

    /// # Errors
    /// Returns an error on bus failure
    pub fn tx_disabled(&self) -> Result<bool, Error> {
        Ok(self.status()?.soft_tx_disable)
    }

    /// Set or clear the soft TX disable bit, leaving the rest of the control byte as it was
    /// # Errors
    /// Returns an error on bus failure
    pub fn set_tx_disable(&self, disable: bool) -> Result<(), Error> {
        let mut status = self.status()?;
        status.soft_tx_disable = disable;
        Ok(self.diagnostics.write_reg(&status)?)
    }
}
