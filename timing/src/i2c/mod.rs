//! Software-driven I2C bus mastering over a register-mapped OpenCores I2C core.
//!
//! The core is exposed as five registers under one node of the register tree: the two prescale
//! halves, control, data, and a combined command (on write) / status (on read) register. Every
//! byte on the wire is one command word written to the core followed by status polls until the
//! transfer completes.

pub mod bus;
pub mod device;
pub mod registers;

pub use bus::{
    BusConfig,
    I2cBus,
    ResetPath,
};
pub use device::I2cDevice;
pub use registers::{
    Command,
    Control,
    Status,
};

use crate::transport;
use thiserror::Error;

/// Implemented (via the `#[address(..)]` attribute) by register layouts that live at a fixed
/// sub-register address inside an I2C slave
pub trait Address {
    const ADDR: u8;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Arbitration lost on the I2C bus")]
    ArbitrationLost,
    #[error("I2C transfer still in progress after {attempts} status polls")]
    Timeout { attempts: usize },
    #[error("No acknowledgement from the I2C slave")]
    NoAcknowledge,
    #[error("I2C bus still busy after a transfer that should have released it")]
    StillBusy,
    #[error("No I2C slave named `{0}` on this bus")]
    UnknownSlave(String),
    #[error("Invalid I2C address literal `{0}`")]
    InvalidAddress(String),
    #[error("I2C address {0:#04x} is outside the 7-bit range")]
    AddressOutOfRange(u8),
    #[error("I2C command requests both a read and a write")]
    ConflictingDirection,
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

impl From<packed_struct::PackingError> for Error {
    fn from(e: packed_struct::PackingError) -> Self {
        Self::Transport(e.into())
    }
}
