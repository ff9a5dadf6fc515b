//! # Timing Utilities
//!
//! This small library contains the file formats used when programming timing-distribution
//! hardware, independent of any transport.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod regconfig;
