//! Register layouts of the OpenCores I2C core

use super::Error;
use crate::transport::Serialize;
use packed_struct::prelude::*;
use timing_derive::RegisterSerde;

/// The command word. READ and WRITE select the direction of the byte transfer and must never
/// both be set.
#[derive(PackedStruct, RegisterSerde, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct Command {
    /// Generate a (repeated) start condition
    #[packed_field(bits = "7")]
    pub start: bool,
    /// Generate a stop condition after the byte
    #[packed_field(bits = "6")]
    pub stop: bool,
    /// Read a byte from the slave
    #[packed_field(bits = "5")]
    pub read: bool,
    /// Write a byte to the slave
    #[packed_field(bits = "4")]
    pub write: bool,
    /// When reading, send NACK instead of ACK after the byte
    #[packed_field(bits = "3")]
    pub ack: bool,
    /// Clear a pending interrupt
    #[packed_field(bits = "0")]
    pub iack: bool,
}

impl Command {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_start(self) -> Self {
        Self {
            start: true,
            ..self
        }
    }

    #[must_use]
    pub fn with_stop(self, stop: bool) -> Self {
        Self { stop, ..self }
    }

    #[must_use]
    pub fn with_ack(self) -> Self {
        Self { ack: true, ..self }
    }

    #[must_use]
    pub fn with_read(self) -> Self {
        Self { read: true, ..self }
    }

    #[must_use]
    pub fn with_write(self) -> Self {
        Self {
            write: true,
            ..self
        }
    }

    /// Encode into the word written to the command register
    /// # Errors
    /// Returns an error if both READ and WRITE are set
    pub fn encode(&self) -> Result<u32, Error> {
        if self.read && self.write {
            return Err(Error::ConflictingDirection);
        }
        Ok(self.serialize()?)
    }
}

/// The status word read back from the command/status register
#[derive(PackedStruct, RegisterSerde, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct Status {
    /// Set when the slave did *not* acknowledge the last byte
    #[packed_field(bits = "7")]
    pub rx_nack: bool,
    /// Set between a start and a stop condition
    #[packed_field(bits = "6")]
    pub busy: bool,
    #[packed_field(bits = "5")]
    pub arbitration_lost: bool,
    #[packed_field(bits = "1")]
    pub transfer_in_progress: bool,
    #[packed_field(bits = "0")]
    pub interrupt: bool,
}

impl Status {
    #[must_use]
    pub fn ack_received(&self) -> bool {
        !self.rx_nack
    }
}

/// The control word
#[derive(PackedStruct, RegisterSerde, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
pub struct Control {
    /// Core enable
    #[packed_field(bits = "7")]
    pub enable: bool,
    /// Interrupt enable
    #[packed_field(bits = "6")]
    pub interrupt_enable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Deserialize;

    #[test]
    fn test_command_bits() {
        assert_eq!(Command::new().with_start().with_write().encode().unwrap(), 0x90);
        assert_eq!(Command::new().with_stop(true).with_write().encode().unwrap(), 0x50);
        assert_eq!(
            Command::new().with_read().with_stop(true).with_ack().encode().unwrap(),
            0x68
        );
        assert_eq!(Command { iack: true, ..Command::new() }.encode().unwrap(), 0x01);
    }

    #[test]
    fn test_conflicting_direction() {
        assert!(matches!(
            Command::new().with_read().with_write().encode(),
            Err(Error::ConflictingDirection)
        ));
    }

    #[test]
    fn test_status_bits() {
        let status = Status::deserialize(0xA2).unwrap();
        assert!(status.rx_nack);
        assert!(!status.ack_received());
        assert!(!status.busy);
        assert!(status.arbitration_lost);
        assert!(status.transfer_in_progress);
        // Upper bytes of the word are ignored
        let status = Status::deserialize(0xFFFF_FF40).unwrap();
        assert!(status.busy);
        assert!(status.ack_received());
    }

    #[test]
    fn test_control_bits() {
        let ctrl = Control {
            enable: true,
            ..Default::default()
        };
        assert_eq!(ctrl.serialize().unwrap(), 0x80);
        assert_eq!(Control::deserialize(0x80).unwrap(), ctrl);
    }
}
