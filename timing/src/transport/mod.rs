//! Defines the register transport that every piece of hardware access goes through.
//!
//! Register operations are never executed one at a time. They are staged into a [`Batch`] in issue
//! order and the whole batch is executed by [`Transport::dispatch`] as a single round trip. Reads
//! staged in a batch hand back a [`Pending`] token which can only be resolved against the
//! [`Response`] of that dispatch, so a read value can never be observed before it exists.

pub mod mock;
pub mod sim;

use kstring::KString;
use packed_struct::PackingError;
use std::sync::{
    Mutex,
    Weak,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Requested register doesn't exist - `{0}`")]
    MissingRegister(KString),
    #[error("A pending read was resolved against a response it doesn't belong to")]
    UnresolvedRead,
    #[error("The transport this object refers to has been dropped")]
    Dropped,
    #[error("The transport lock was poisoned")]
    Poisoned,
    #[error("Error packing or unpacking a register layout")]
    Packing(#[from] PackingError),
    #[error("Internal system IO error")]
    Io(#[from] std::io::Error),
}

pub type TransportResult<T> = Result<T, Error>;

/// Types that implement this trait can be serialized into a 32-bit register word
pub trait Serialize {
    /// # Errors
    /// Returns an error if the value can't be packed
    fn serialize(&self) -> TransportResult<u32>;
}

/// Types that implement this trait can be deserialized from a 32-bit register word
pub trait Deserialize: Sized {
    /// # Errors
    /// Returns an error if the word isn't a valid representation
    fn deserialize(word: u32) -> TransportResult<Self>;
}

macro_rules! ser_num {
    ($num:ty) => {
        impl Serialize for $num {
            fn serialize(&self) -> TransportResult<u32> {
                Ok(u32::from(*self))
            }
        }
    };
}

macro_rules! deser_num {
    ($num:ty) => {
        impl Deserialize for $num {
            #[allow(clippy::cast_possible_truncation)]
            fn deserialize(word: u32) -> TransportResult<Self> {
                // Registers narrower than a word live in its low bits
                Ok(word as $num)
            }
        }
    };
}

ser_num!(u8);
ser_num!(u16);
ser_num!(u32);

deser_num!(u8);
deser_num!(u16);
deser_num!(u32);

impl Serialize for bool {
    fn serialize(&self) -> TransportResult<u32> {
        Ok(u32::from(*self))
    }
}

impl Deserialize for bool {
    fn deserialize(word: u32) -> TransportResult<Self> {
        Ok(word & 1 == 1)
    }
}

/// A single staged register operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Write { register: KString, value: u32 },
    Read { register: KString },
}

impl Operation {
    /// The register this operation targets
    #[must_use]
    pub fn register(&self) -> &str {
        match self {
            Operation::Write { register, .. } | Operation::Read { register } => register,
        }
    }
}

/// A handle to the result of a staged read, resolvable once the batch is dispatched
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pending {
    batch: u64,
    index: usize,
}

/// An ordered set of register operations to be executed in one round trip
#[derive(Debug, Clone)]
pub struct Batch {
    id: u64,
    ops: Vec<Operation>,
    reads: usize,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        use std::sync::atomic::{
            AtomicU64,
            Ordering,
        };
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            ops: vec![],
            reads: 0,
        }
    }

    /// Stage a write of `value` to `register`
    pub fn write(&mut self, register: &str, value: u32) -> &mut Self {
        self.ops.push(Operation::Write {
            register: KString::from_ref(register),
            value,
        });
        self
    }

    /// Stage a read of `register`, returning the handle its value will be available under
    pub fn read(&mut self, register: &str) -> Pending {
        self.ops.push(Operation::Read {
            register: KString::from_ref(register),
        });
        let pending = Pending {
            batch: self.id,
            index: self.reads,
        };
        self.reads += 1;
        pending
    }

    /// The staged operations, in issue order
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Execute this batch as a single round trip over `transport`
    /// # Errors
    /// Returns an error on bad transport
    pub fn execute<T>(&self, transport: &mut T) -> TransportResult<Response>
    where
        T: Transport + ?Sized,
    {
        transport.dispatch(self)
    }

    /// Execute this batch on a transport held behind the upwards pointer every block keeps
    /// # Errors
    /// Returns an error if the transport has been dropped, its lock is poisoned, or on bad
    /// transport
    pub fn execute_shared<T>(&self, transport: &Weak<Mutex<T>>) -> TransportResult<Response>
    where
        T: Transport,
    {
        let tarc = transport.upgrade().ok_or(Error::Dropped)?;
        let mut transport = tarc.lock().map_err(|_| Error::Poisoned)?;
        transport.dispatch(self)
    }
}

/// The values of every read in a dispatched batch
#[derive(Debug, Clone)]
pub struct Response {
    batch: u64,
    values: Vec<u32>,
}

impl Response {
    /// Transports build a response from the read values of `batch`, in issue order
    #[must_use]
    pub fn new(batch: &Batch, values: Vec<u32>) -> Self {
        Self {
            batch: batch.id,
            values,
        }
    }

    /// Get the raw word for a staged read
    /// # Errors
    /// Returns an error if `pending` came from a different batch
    pub fn get(&self, pending: Pending) -> TransportResult<u32> {
        if pending.batch != self.batch {
            return Err(Error::UnresolvedRead);
        }
        self.values
            .get(pending.index)
            .copied()
            .ok_or(Error::UnresolvedRead)
    }

    /// Get a staged read as a `Deserializable` type
    /// # Errors
    /// Returns an error if `pending` came from a different batch or the word doesn't deserialize
    pub fn decode<D>(&self, pending: Pending) -> TransportResult<D>
    where
        D: Deserialize,
    {
        D::deserialize(self.get(pending)?)
    }
}

/// The trait that is implemented for register transports.
/// The methods of this trait *assume* that the device is already connected.
pub trait Transport {
    /// Execute every operation in `batch`, in issue order, as one round trip
    /// # Errors
    /// Returns an error on bad transport
    fn dispatch(&mut self, batch: &Batch) -> TransportResult<Response>;

    /// Read a single register in its own round trip
    /// # Errors
    /// Returns an error on bad transport
    fn read(&mut self, register: &str) -> TransportResult<u32> {
        let mut batch = Batch::new();
        let value = batch.read(register);
        self.dispatch(&batch)?.get(value)
    }

    /// Write a single register in its own round trip
    /// # Errors
    /// Returns an error on bad transport
    fn write(&mut self, register: &str, value: u32) -> TransportResult<()> {
        let mut batch = Batch::new();
        batch.write(register, value);
        self.dispatch(&batch)?;
        Ok(())
    }
}
