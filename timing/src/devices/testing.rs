//! Shared fixtures for the device tests
use crate::{
    core::SlaveParameters,
    i2c::{
        BusConfig,
        I2cBus,
    },
    transport::sim::SimI2c,
};
use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

pub(crate) const NODE: &str = "io.i2c";

/// Bring up a bus over a simulated core
pub(crate) fn bus(sim: SimI2c) -> (Arc<Mutex<SimI2c>>, Mutex<I2cBus<SimI2c>>) {
    let transport = Arc::new(Mutex::new(sim));
    let slaves = SlaveParameters::from([
        ("SI5345".into(), "0x68".to_owned()),
        ("SI5326".into(), "0x69".to_owned()),
        ("SFP_EEPROM".into(), "0x50".to_owned()),
        ("EXPANDER".into(), "0x74".to_owned()),
    ]);
    let config = BusConfig {
        poll_interval: Duration::ZERO,
        ..Default::default()
    };
    let bus = I2cBus::new(Arc::downgrade(&transport), NODE, &slaves, config)
        .expect("Fixture bus should build");
    (transport, Mutex::new(bus))
}
