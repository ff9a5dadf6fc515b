//! The Si5326 jitter-attenuating clock multiplier, with a flat 8-bit register space

use super::Error;
use crate::{
    i2c::I2cDevice,
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
use tracing::debug;

/// `PARTNUM_RO[11:4]`, followed by `PARTNUM_RO[3:0]` and `REVID_RO` sharing one byte
const DEVICE_ID: u8 = 134;

/// The part number and revision the chip reports
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceId {
    /// Part number as BCD, `0x326` for a Si5326
    pub part_number: u16,
    pub revision: u8,
}

#[derive(Debug)]
pub struct Si5326<'a, T> {
    device: I2cDevice<'a, T>,
}

impl<'a, T> Si5326<'a, T>
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

    /// # Errors
    /// Returns an error on bus failure
    pub fn read_device_id(&self) -> Result<DeviceId, Error> {
        let bytes = self.device.read_registers(DEVICE_ID, 2)?;
        let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
        Ok(DeviceId {
            part_number: raw >> 4,
            revision: bytes[1] & 0x0F,
        })
    }

    /// # Errors
    /// Returns an error on bus failure
    pub fn read_register(&self, address: u8) -> Result<u8, Error> {
        Ok(self.device.read_register(address)?)
    }

    /// Upload an `Address,Data` register export to the chip
    /// # Errors
    /// Returns an error if the file can't be read or parsed, or (in strict mode) if any register
    /// failed to write
    pub fn configure(&mut self, path: &Path, policy: &UploadPolicy) -> Result<UploadOutcome, Error> {
        debug!(path = %path.display(), address = self.device.address(), "Configuring Si5326");
        Ok(upload::upload_file(self, path, Dialect::Plain, policy)?)
    }

    /// Upload an `Address,Data` register export held in memory
    /// # Errors
    /// Returns an error if parsing fails, or (in strict mode) if any register failed to write
    pub fn configure_str(
        &mut self,
        contents: &str,
        policy: &UploadPolicy,
    ) -> Result<UploadOutcome, Error> {
        Ok(upload::upload_str(self, contents, Dialect::Plain, policy)?)
    }
}

impl<'a, T> RegisterWriter for Si5326<'a, T>
where
    T: Transport,
{
    type Error = Error;

    fn write_register(&mut self, address: u16, value: u8) -> Result<(), Error> {
        let register = u8::try_from(address).map_err(|_| Error::AddressOutOfRange(address))?;
        Ok(self.device.write_register(register, value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        devices::testing::{
            bus,
            NODE,
        },
        transport::sim::{
            SimI2c,
            SimSlave,
        },
        upload::FailureMode,
    };

    const ADDR: u8 = 0x69;

    fn sim() -> SimI2c {
        let mut sim = SimI2c::new(NODE);
        sim.attach(ADDR, SimSlave::flat().with(134, 0x32).with(135, 0x62));
        sim
    }

    #[test]
    fn test_device_id() {
        let (_transport, bus) = bus(sim());
        let chip = Si5326::new(I2cDevice::from_name(&bus, "SI5326").unwrap());
        assert_eq!(
            chip.read_device_id().unwrap(),
            DeviceId {
                part_number: 0x326,
                revision: 2
            }
        );
    }

    #[test]
    fn test_configure() {
        let (transport, bus) = bus(sim());
        let mut chip = Si5326::new(I2cDevice::new(&bus, ADDR).unwrap());
        let outcome = chip
            .configure_str(
                "Address,Data\n0,0x14\n1,0xE4\n0x88,0x40\n",
                &UploadPolicy::default(),
            )
            .unwrap();
        assert!(outcome.is_complete());
        let sim = transport.lock().unwrap();
        assert_eq!(
            sim.slave(ADDR).unwrap().writes(),
            &[(0x00, 0x14), (0x01, 0xE4), (0x88, 0x40)]
        );
    }

    #[test]
    fn test_wide_address_rejected() {
        let (transport, bus) = bus(sim());
        let mut chip = Si5326::new(I2cDevice::new(&bus, ADDR).unwrap());
        let policy = UploadPolicy {
            mode: FailureMode::BestEffort,
            ..Default::default()
        };
        let outcome = chip
            .configure_str("Address,Data\n0x0100,0x01\n0x02,0x03\n", &policy)
            .unwrap();
        assert_eq!(outcome.failed_addresses(), vec![0x0100]);
        assert_eq!(
            transport.lock().unwrap().slave(ADDR).unwrap().writes(),
            &[(0x02, 0x03)]
        );
    }

    #[test]
    fn test_read_register() {
        let (_transport, bus) = bus(sim());
        let chip = Si5326::new(I2cDevice::new(&bus, ADDR).unwrap());
        assert_eq!(chip.read_register(135).unwrap(), 0x62);
    }
}
