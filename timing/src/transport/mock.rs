//! Mock transport implementations used in testing the interface

use super::{
    Batch,
    Error,
    Operation,
    Response,
    Transport,
    TransportResult,
};
use kstring::KString;
use std::collections::{
    HashMap,
    VecDeque,
};

/// A platform that mocks reads and writes, useful for testing.
///
/// Every register is a plain 32-bit memory cell, except that reads can be scripted: a register
/// with queued read values pops one per read, and a register with a sticky read value returns
/// that value instead of whatever was last written. Every dispatched batch is recorded.
#[derive(Debug, Default)]
pub struct Mock {
    memory: HashMap<KString, u32>,
    scripted: HashMap<KString, VecDeque<u32>>,
    sticky: HashMap<KString, u32>,
    batches: Vec<Vec<Operation>>,
}

impl Mock {
    /// Construct a new mock platform by providing the names of the registers it exposes
    #[must_use]
    pub fn new<'a, I>(registers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            memory: registers
                .into_iter()
                .map(|name| (KString::from_ref(name), 0))
                .collect(),
            ..Default::default()
        }
    }

    /// Queue values that successive reads of `register` return, ahead of any sticky value
    pub fn script<I>(&mut self, register: &str, values: I)
    where
        I: IntoIterator<Item = u32>,
    {
        self.scripted
            .entry(KString::from_ref(register))
            .or_default()
            .extend(values);
    }

    /// Make reads of `register` return `value` once its script is exhausted
    pub fn on_read(&mut self, register: &str, value: u32) {
        self.sticky.insert(KString::from_ref(register), value);
    }

    /// Set the stored value of a register without recording a batch
    /// # Errors
    /// Returns an error if the register doesn't exist
    pub fn poke(&mut self, register: &str, value: u32) -> TransportResult<()> {
        let cell = self
            .memory
            .get_mut(register)
            .ok_or_else(|| Error::MissingRegister(KString::from_ref(register)))?;
        *cell = value;
        Ok(())
    }

    /// Get the stored value of a register without recording a batch
    #[must_use]
    pub fn peek(&self, register: &str) -> Option<u32> {
        self.memory.get(register).copied()
    }

    /// Every batch dispatched so far, in order
    #[must_use]
    pub fn batches(&self) -> &[Vec<Operation>] {
        &self.batches
    }

    /// Every value written to `register` so far, in order
    #[must_use]
    pub fn writes_to(&self, register: &str) -> Vec<u32> {
        self.batches
            .iter()
            .flatten()
            .filter_map(|op| match op {
                Operation::Write { register: r, value } if r.as_str() == register => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Number of reads of `register` so far
    #[must_use]
    pub fn reads_of(&self, register: &str) -> usize {
        self.batches
            .iter()
            .flatten()
            .filter(|op| matches!(op, Operation::Read { register: r } if r.as_str() == register))
            .count()
    }

    /// Forget the recorded batches
    pub fn clear_log(&mut self) {
        self.batches.clear();
    }
}

impl Transport for Mock {
    fn dispatch(&mut self, batch: &Batch) -> TransportResult<Response> {
        // Validate the whole batch before applying any of it
        for op in batch.operations() {
            if !self.memory.contains_key(op.register()) {
                return Err(Error::MissingRegister(KString::from_ref(op.register())));
            }
        }
        let mut values = vec![];
        for op in batch.operations() {
            match op {
                Operation::Write { register, value } => {
                    self.memory.insert(register.clone(), *value);
                }
                Operation::Read { register } => {
                    let scripted = self
                        .scripted
                        .get_mut(register)
                        .and_then(VecDeque::pop_front);
                    let value = scripted
                        .or_else(|| self.sticky.get(register).copied())
                        .or_else(|| self.memory.get(register).copied())
                        .ok_or_else(|| Error::MissingRegister(register.clone()))?;
                    values.push(value);
                }
            }
        }
        self.batches.push(batch.operations().to_vec());
        Ok(Response::new(batch, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let mut transport = Mock::new(["scratchpad"]);
        transport.write("scratchpad", 0xDEAD_BEEF).unwrap();
        assert_eq!(transport.read("scratchpad").unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_missing_register() {
        let mut transport = Mock::new(["scratchpad"]);
        let mut batch = Batch::new();
        batch.write("scratchpad", 1).write("nope", 2);
        assert!(matches!(
            batch.execute(&mut transport),
            Err(Error::MissingRegister(_))
        ));
        // Nothing from the failed batch was applied
        assert_eq!(transport.peek("scratchpad"), Some(0));
        assert!(transport.batches().is_empty());
    }

    #[test]
    fn test_batch_order() {
        let mut transport = Mock::new(["a"]);
        let mut batch = Batch::new();
        let before = batch.read("a");
        batch.write("a", 5);
        let after = batch.read("a");
        let response = batch.execute(&mut transport).unwrap();
        assert_eq!(response.get(before).unwrap(), 0);
        assert_eq!(response.get(after).unwrap(), 5);
    }

    #[test]
    fn test_scripted_reads() {
        let mut transport = Mock::new(["status"]);
        transport.script("status", [2, 2]);
        transport.on_read("status", 0);
        transport.write("status", 0x90).unwrap();
        assert_eq!(transport.read("status").unwrap(), 2);
        assert_eq!(transport.read("status").unwrap(), 2);
        assert_eq!(transport.read("status").unwrap(), 0);
        assert_eq!(transport.reads_of("status"), 3);
        assert_eq!(transport.writes_to("status"), vec![0x90]);
    }
}
