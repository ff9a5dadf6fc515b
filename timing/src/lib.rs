//! # Timing
//!
//! Monitor and control of timing-distribution boards whose peripherals hang off OpenCores I2C
//! cores exposed as remote registers.
//!
//! A board owns its register [`Transport`](transport::Transport) and hands each
//! [`I2cBus`](i2c::I2cBus) a weak pointer to it. Peripherals are reached through
//! [`I2cDevice`](i2c::I2cDevice) handles that borrow the bus, and the clock chips are programmed
//! with the retrying register [`upload`] protocol.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use timing::prelude::*;
//! use timing::transport::sim::{SimI2c, SimSlave};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut sim = SimI2c::new("clk.i2c");
//!     sim.attach(0x74, SimSlave::flat().with(0x00, 0x5A));
//!     let transport = Arc::new(Mutex::new(sim));
//!
//!     let slaves = SlaveParameters::from([("EXPANDER".into(), "0x74".to_owned())]);
//!     let bus = Mutex::new(I2cBus::new(
//!         Arc::downgrade(&transport),
//!         "clk.i2c",
//!         &slaves,
//!         BusConfig::default(),
//!     )?);
//!
//!     let expander = IoExpander::new(I2cDevice::from_name(&bus, "EXPANDER")?);
//!     assert_eq!(expander.read_inputs(0)?, 0x5A);
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod core;
pub mod devices;
pub mod i2c;
pub mod prelude;
pub mod transport;
pub mod upload;
