//! The core types and functions shared by the bus and device layers
use crate::i2c::Error;
use kstring::KString;
use std::collections::HashMap;

/// The mapping from logical slave names to address literals, as given in a board's configuration
/// parameters. Literals are decimal or `0x`-prefixed hexadecimal.
pub type SlaveParameters = HashMap<KString, String>;

/// Join a register node path and a leaf name with the hierarchy separator
#[must_use]
pub fn register_path(node: &str, leaf: &str) -> KString {
    if node.is_empty() {
        KString::from_ref(leaf)
    } else {
        KString::from_string(format!("{node}.{leaf}"))
    }
}

/// Parse an I2C slave address literal, decimal or `0x`-prefixed hexadecimal
/// # Errors
/// Returns an error if the literal isn't a number or doesn't fit in 7 bits
pub fn parse_address_literal(literal: &str) -> Result<u8, Error> {
    let trimmed = literal.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => trimmed.parse(),
    }
    .map_err(|_| Error::InvalidAddress(literal.to_owned()))?;
    if parsed > 0x7F {
        return Err(Error::AddressOutOfRange(parsed));
    }
    Ok(parsed)
}
