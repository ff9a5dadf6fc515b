//! Drivers for the peripherals that sit on the timing boards' I2C buses. Each one composes an
//! [`I2cDevice`](crate::i2c::I2cDevice) handle and never drives the bus directly.

pub mod expander;
pub mod sfp;
pub mod si5326;
pub mod si534x;

#[cfg(test)]
pub(crate) mod testing;

use crate::{
    i2c,
    upload,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    I2c(#[from] i2c::Error),
    #[error(transparent)]
    Upload(#[from] upload::Error),
    #[error("Invalid bank id {0}")]
    InvalidBank(u8),
    #[error("Invalid channel id {0}")]
    InvalidChannel(u8),
    #[error("Register address {0:#06x} is outside the chip's register space")]
    AddressOutOfRange(u16),
    #[error("The SFP does not implement digital diagnostic monitoring")]
    DdmUnsupported,
    #[error("The SFP's diagnostics are only externally calibrated")]
    ExternalCalibration,
}

impl From<packed_struct::PackingError> for Error {
    fn from(e: packed_struct::PackingError) -> Self {
        Self::I2c(e.into())
    }
}
