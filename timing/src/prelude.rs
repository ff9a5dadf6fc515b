//! Prelude (helpful reexports) for this package

pub use crate::{
    core::SlaveParameters,
    devices::{
        expander::IoExpander,
        sfp::Sfp,
        si5326::Si5326,
        si534x::Si534x,
    },
    i2c::{
        BusConfig,
        I2cBus,
        I2cDevice,
    },
    transport::{
        Batch,
        Transport,
    },
    upload::{
        FailureMode,
        RegisterWriter,
        UploadOutcome,
        UploadPolicy,
    },
};
