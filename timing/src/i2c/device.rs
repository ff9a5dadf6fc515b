//! Slave handles. An [`I2cDevice`] binds one 7-bit address to a bus owned by someone else; every
//! device driver composes one of these rather than driving the bus itself.

use super::{
    bus::I2cBus,
    Address,
    Error,
};
use crate::transport::{
    self,
    Transport,
};
use packed_struct::prelude::*;
use std::sync::{
    Mutex,
    MutexGuard,
};

/// A handle to one slave on an [`I2cBus`]. The handle borrows the bus for its whole life, and
/// takes the bus lock for the duration of each transaction.
#[derive(Debug)]
pub struct I2cDevice<'a, T> {
    bus: &'a Mutex<I2cBus<T>>,
    address: u8,
}

impl<'a, T> I2cDevice<'a, T>
where
    T: Transport,
{
    /// Bind a handle to `address` on `bus`
    /// # Errors
    /// Returns an error if `address` is not a 7-bit address
    pub fn new(bus: &'a Mutex<I2cBus<T>>, address: u8) -> Result<Self, Error> {
        if address > 0x7F {
            return Err(Error::AddressOutOfRange(address));
        }
        Ok(Self { bus, address })
    }

    /// Bind a handle to the slave configured on `bus` under the logical name `name`
    /// # Errors
    /// Returns an error if the bus has no slave of that name
    pub fn from_name(bus: &'a Mutex<I2cBus<T>>, name: &str) -> Result<Self, Error> {
        let address = Self::lock_bus(bus)?.slave_address(name)?;
        Self::new(bus, address)
    }

    #[must_use]
    pub fn address(&self) -> u8 {
        self.address
    }

    fn lock_bus(bus: &'a Mutex<I2cBus<T>>) -> Result<MutexGuard<'a, I2cBus<T>>, Error> {
        Ok(bus.lock().map_err(|_| transport::Error::Poisoned)?)
    }

    /// Run `f` with exclusive access to the bus, for sequences of transactions that must not be
    /// interleaved with anyone else's
    /// # Errors
    /// Returns whatever `f` returns, or an error if the bus lock is poisoned
    pub fn with_bus<O, E, F>(&self, f: F) -> Result<O, E>
    where
        F: FnOnce(&mut I2cBus<T>, u8) -> Result<O, E>,
        E: From<Error>,
    {
        let mut bus = Self::lock_bus(self.bus)?;
        f(&mut bus, self.address)
    }

    /// Read one sub-register
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_register(&self, register: u8) -> Result<u8, Error> {
        let bytes = self.read_registers(register, 1)?;
        Ok(bytes[0])
    }

    /// Write one sub-register
    /// # Errors
    /// Returns an error on bus failure
    pub fn write_register(&self, register: u8, value: u8) -> Result<(), Error> {
        self.write_registers(register, &[value])
    }

    /// Read `n` consecutive sub-registers starting at `register`
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_registers(&self, register: u8, n: usize) -> Result<Vec<u8>, Error> {
        self.with_bus(|bus, address| bus.read_array(address, register, n))
    }

    /// Write consecutive sub-registers starting at `register`
    /// # Errors
    /// Returns an error on bus failure
    pub fn write_registers(&self, register: u8, data: &[u8]) -> Result<(), Error> {
        self.with_bus(|bus, address| bus.write_array(address, register, data, true))
    }

    /// Read `n` bytes with no register pointer
    /// # Errors
    /// Returns an error on bus failure
    pub fn read_raw(&self, n: usize) -> Result<Vec<u8>, Error> {
        self.with_bus(|bus, address| bus.read_block(address, n))
    }

    /// Write bytes with no register pointer
    /// # Errors
    /// Returns an error on bus failure
    pub fn write_raw(&self, data: &[u8]) -> Result<(), Error> {
        self.with_bus(|bus, address| bus.write_block(address, data, true))
    }

    /// Check if the slave acknowledges its address
    #[must_use]
    pub fn ping(&self) -> bool {
        Self::lock_bus(self.bus)
            .map(|mut bus| bus.ping(self.address))
            .unwrap_or(false)
    }

    /// Read a single-byte register layout from the sub-register it lives at
    /// # Errors
    /// Returns an error on bus failure or if the byte doesn't unpack
    pub fn read_reg<R>(&self) -> Result<R, Error>
    where
        R: Address + PackedStruct,
    {
        let byte = self.read_register(R::ADDR)?;
        Ok(R::unpack_from_slice(&[byte])?)
    }

    /// Write a single-byte register layout to the sub-register it lives at
    /// # Errors
    /// Returns an error on bus failure or if the layout doesn't pack into one byte
    pub fn write_reg<R>(&self, reg: &R) -> Result<(), Error>
    where
        R: Address + PackedStruct,
    {
        let mut packed = [0u8; 1];
        reg.pack_to_slice(&mut packed)?;
        self.write_register(R::ADDR, packed[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::SlaveParameters,
        i2c::BusConfig,
        transport::sim::{
            SimI2c,
            SimSlave,
        },
    };
    use std::{
        sync::Arc,
        time::Duration,
    };
    use timing_derive::address;

    #[address(0x03)]
    #[derive(PackedStruct, Debug, Default, PartialEq)]
    #[packed_struct(bit_numbering = "lsb0", size_bytes = "1")]
    struct Flags {
        #[packed_field(bits = "7")]
        high: bool,
        #[packed_field(bits = "0")]
        low: bool,
    }

    fn setup() -> (Arc<Mutex<SimI2c>>, Mutex<I2cBus<SimI2c>>) {
        let mut sim = SimI2c::new("i2c");
        sim.attach(0x20, SimSlave::flat().with(0x00, 0xAA).with(0x01, 0xBB));
        let transport = Arc::new(Mutex::new(sim));
        let slaves = SlaveParameters::from([("EXPANDER".into(), "0x20".to_owned())]);
        let config = BusConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        let bus = I2cBus::new(Arc::downgrade(&transport), "i2c", &slaves, config).unwrap();
        (transport, Mutex::new(bus))
    }

    #[test]
    fn test_registers() {
        let (transport, bus) = setup();
        let dev = I2cDevice::new(&bus, 0x20).unwrap();
        assert_eq!(dev.read_register(0x01).unwrap(), 0xBB);
        assert_eq!(dev.read_registers(0x00, 2).unwrap(), vec![0xAA, 0xBB]);
        dev.write_registers(0x10, &[1, 2, 3]).unwrap();
        assert_eq!(dev.read_registers(0x10, 3).unwrap(), vec![1, 2, 3]);
        let sim = transport.lock().unwrap();
        assert_eq!(
            sim.slave(0x20).unwrap().writes(),
            &[(0x10, 1), (0x11, 2), (0x12, 3)]
        );
    }

    #[test]
    fn test_by_name() {
        let (_transport, bus) = setup();
        let dev = I2cDevice::from_name(&bus, "EXPANDER").unwrap();
        assert_eq!(dev.address(), 0x20);
        assert!(dev.ping());
        assert!(matches!(
            I2cDevice::from_name(&bus, "SFP"),
            Err(Error::UnknownSlave(_))
        ));
    }

    #[test]
    fn test_absent_slave() {
        let (_transport, bus) = setup();
        let dev = I2cDevice::new(&bus, 0x21).unwrap();
        assert!(!dev.ping());
        assert!(matches!(dev.read_register(0), Err(Error::NoAcknowledge)));
        assert!(matches!(
            I2cDevice::new(&bus, 0x90),
            Err(Error::AddressOutOfRange(0x90))
        ));
    }

    #[test]
    fn test_typed_registers() {
        let (_transport, bus) = setup();
        let dev = I2cDevice::new(&bus, 0x20).unwrap();
        dev.write_reg(&Flags {
            high: true,
            low: false,
        })
        .unwrap();
        assert_eq!(dev.read_register(0x03).unwrap(), 0x80);
        let flags: Flags = dev.read_reg().unwrap();
        assert!(flags.high && !flags.low);
    }

    #[test]
    fn test_raw() {
        let (transport, bus) = setup();
        let dev = I2cDevice::new(&bus, 0x20).unwrap();
        // A raw write's first byte lands in the slave's pointer
        dev.write_raw(&[0x05, 0x77]).unwrap();
        assert_eq!(transport.lock().unwrap().slave(0x20).unwrap().get(0x05), 0x77);
        // Reads continue from where the pointer was left
        assert_eq!(dev.read_raw(1).unwrap(), vec![0x00]);
    }
}
