//! The I2C bus master. One [`I2cBus`] drives one OpenCores I2C core.
//!
//! Every primitive stages its register writes into a batch, dispatches it, and then polls the
//! status register until the core reports the transfer finished. Nothing is pipelined across
//! dispatches: the bus is a stateful electrical resource and each byte must complete before the
//! next is issued. Transaction methods take `&mut self`, so a transaction holds the bus
//! exclusively for its whole duration.

use super::{
    registers::{
        Command,
        Control,
        Status,
    },
    Error,
};
use crate::{
    core::{
        parse_address_literal,
        register_path,
        SlaveParameters,
    },
    transport::{
        Batch,
        Response,
        Serialize,
        Transport,
    },
};
use kstring::KString;
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        Weak,
    },
    time::Duration,
};
use tracing::{
    debug,
    trace,
};

/// Clock feeding the I2C core (the register bus clock)
pub const DEFAULT_CLOCK_HZ: u32 = 31_250_000;
/// Standard-mode I2C
pub const DEFAULT_SCL_HZ: u32 = 100_000;
pub const DEFAULT_POLL_ATTEMPTS: usize = 20;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Highest address probed by [`I2cBus::scan`] is one below this
const SCAN_LIMIT: u8 = 0x7F;

/// Timing parameters of a bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Frequency of the clock driving the core
    pub clock_hz: u32,
    /// Desired SCL frequency
    pub scl_hz: u32,
    /// Number of status polls before a transfer is declared timed out
    pub poll_attempts: usize,
    /// Sleep between status polls
    pub poll_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            scl_hz: DEFAULT_SCL_HZ,
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl BusConfig {
    /// The prescale value the core needs to run SCL at `scl_hz`, `clock / (5 * scl) - 1`
    #[must_use]
    pub fn prescale(&self) -> u16 {
        let divided = self.clock_hz / self.scl_hz.max(1).saturating_mul(5);
        u16::try_from(divided.saturating_sub(1)).unwrap_or(u16::MAX)
    }
}

/// Which path [`I2cBus::reset`] took
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetPath {
    /// Prescale was already correct, only the data and command registers were cleared
    Short,
    /// The core was disabled, reprogrammed, and re-enabled
    Full,
}

#[derive(Debug, Clone)]
struct CoreRegisters {
    ps_lo: KString,
    ps_hi: KString,
    ctrl: KString,
    data: KString,
    cmd_stat: KString,
}

impl CoreRegisters {
    fn new(node: &str) -> Self {
        Self {
            ps_lo: register_path(node, "ps_lo"),
            ps_hi: register_path(node, "ps_hi"),
            ctrl: register_path(node, "ctrl"),
            data: register_path(node, "data"),
            cmd_stat: register_path(node, "cmd_stat"),
        }
    }
}

/// A register-mapped I2C bus master
#[derive(Debug)]
pub struct I2cBus<T> {
    /// Upwards pointer to the parent board's transport
    transport: Weak<Mutex<T>>,
    /// Register node the core lives under
    node: String,
    regs: CoreRegisters,
    config: BusConfig,
    prescale: u16,
    slaves: HashMap<KString, u8>,
}

impl<T> I2cBus<T>
where
    T: Transport,
{
    /// Create a bus for the core at register node `node`, resolving the slave name table from
    /// `slaves` once
    /// # Errors
    /// Returns an error if any slave address literal is invalid
    pub fn new(
        transport: Weak<Mutex<T>>,
        node: &str,
        slaves: &SlaveParameters,
        config: BusConfig,
    ) -> Result<Self, Error> {
        let slaves = slaves
            .iter()
            .map(|(name, literal)| Ok((name.clone(), parse_address_literal(literal)?)))
            .collect::<Result<HashMap<_, _>, Error>>()?;
        let prescale = config.prescale();
        debug!(node, prescale, slaves = slaves.len(), "Created I2C bus");
        Ok(Self {
            transport,
            node: node.to_owned(),
            regs: CoreRegisters::new(node),
            config,
            prescale,
            slaves,
        })
    }

    /// The register node this core lives under
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The prescale value this bus programs into the core
    #[must_use]
    pub fn prescale(&self) -> u16 {
        self.prescale
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Look up the address of a slave by its logical name
    /// # Errors
    /// Returns an error if no slave of that name was configured
    pub fn slave_address(&self, name: &str) -> Result<u8, Error> {
        self.slaves
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownSlave(name.to_owned()))
    }

    /// The names of all configured slaves, sorted
    #[must_use]
    pub fn slave_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.slaves.keys().map(KString::as_str).collect();
        names.sort_unstable();
        names
    }

    fn dispatch(&self, batch: &Batch) -> Result<Response, Error> {
        Ok(batch.execute_shared(&self.transport)?)
    }

    fn write_one(&self, register: &str, value: u32) -> Result<(), Error> {
        let mut batch = Batch::new();
        batch.write(register, value);
        self.dispatch(&batch)?;
        Ok(())
    }

    /// Reset the bus, reprogramming the core only when the prescale on the bus differs from ours.
    /// # Errors
    /// Returns an error on bad transport
    pub fn reset(&mut self) -> Result<ResetPath, Error> {
        let mut batch = Batch::new();
        let ctrl = batch.read(&self.regs.ctrl);
        let hi = batch.read(&self.regs.ps_hi);
        let lo = batch.read(&self.regs.ps_lo);
        let response = self.dispatch(&batch)?;
        let ctrl: Control = response.decode(ctrl)?;
        let on_bus = u16::from_be_bytes([response.decode::<u8>(hi)?, response.decode::<u8>(lo)?]);

        if on_bus == self.prescale {
            let mut batch = Batch::new();
            batch
                .write(&self.regs.data, 0)
                .write(&self.regs.cmd_stat, 0);
            self.dispatch(&batch)?;
            trace!(node = %self.node, "Short I2C reset");
            return Ok(ResetPath::Short);
        }

        debug!(
            node = %self.node,
            on_bus,
            desired = self.prescale,
            enabled = ctrl.enable,
            "Prescale mismatch, fully resetting I2C core"
        );
        let [hi, lo] = self.prescale.to_be_bytes();
        // Each step is its own round trip so the core sees them strictly in order
        self.write_one(&self.regs.ctrl, Control::default().serialize()?)?;
        self.write_one(&self.regs.ps_hi, u32::from(hi))?;
        self.write_one(&self.regs.ps_lo, u32::from(lo))?;
        self.write_one(&self.regs.data, 0)?;
        self.write_one(&self.regs.cmd_stat, 0)?;
        let enable = Control {
            enable: true,
            ..Default::default()
        };
        self.write_one(&self.regs.ctrl, enable.serialize()?)?;
        Ok(ResetPath::Full)
    }

    /// Poll the status register until the current transfer completes.
    ///
    /// Arbitration loss is fatal on first sight. Once the transfer is no longer in progress, the
    /// acknowledgement and idle conditions are checked if requested.
    /// # Errors
    /// Returns an error on arbitration loss, timeout, a missing acknowledgement, or a bus that
    /// didn't go idle
    pub fn wait_until_finished(
        &mut self,
        require_ack: bool,
        require_idle_at_end: bool,
    ) -> Result<(), Error> {
        let attempts = self.config.poll_attempts;
        for attempt in 1..=attempts {
            let mut batch = Batch::new();
            let status = batch.read(&self.regs.cmd_stat);
            let status: Status = self.dispatch(&batch)?.decode(status)?;
            trace!(node = %self.node, attempt, ?status, "I2C status poll");
            if status.arbitration_lost {
                return Err(Error::ArbitrationLost);
            }
            if !status.transfer_in_progress {
                if require_ack && !status.ack_received() {
                    return Err(Error::NoAcknowledge);
                }
                if require_idle_at_end && status.busy {
                    return Err(Error::StillBusy);
                }
                return Ok(());
            }
            if attempt < attempts {
                std::thread::sleep(self.config.poll_interval);
            }
        }
        Err(Error::Timeout { attempts })
    }

    /// Write `data` with the command `cmd` (WRITE is forced on) and wait for the slave to
    /// acknowledge. If `cmd` carries STOP the bus must also end idle.
    /// # Errors
    /// Returns an error if `cmd` asks for a read, or on any bus failure
    pub fn send_command_and_write(&mut self, cmd: Command, data: u8) -> Result<(), Error> {
        let cmd = cmd.with_write();
        let word = cmd.encode()?;
        let mut batch = Batch::new();
        batch
            .write(&self.regs.data, u32::from(data))
            .write(&self.regs.cmd_stat, word);
        self.dispatch(&batch)?;
        self.wait_until_finished(true, cmd.stop)
    }

    /// Read a byte with the command `cmd` (READ is forced on). No acknowledgement is required, as
    /// the master NAKs the final byte of a read.
    /// # Errors
    /// Returns an error if `cmd` asks for a write, or on any bus failure
    pub fn send_command_and_read(&mut self, cmd: Command) -> Result<u8, Error> {
        let word = cmd.with_read().encode()?;
        let mut batch = Batch::new();
        batch.write(&self.regs.cmd_stat, word);
        self.dispatch(&batch)?;
        self.wait_until_finished(false, false)?;
        let mut batch = Batch::new();
        let data = batch.read(&self.regs.data);
        Ok(self.dispatch(&batch)?.decode(data)?)
    }

    fn check_address(address: u8) -> Result<(), Error> {
        if address > 0x7F {
            Err(Error::AddressOutOfRange(address))
        } else {
            Ok(())
        }
    }

    /// Write `bytes` to the slave at `address`. Only the final byte carries STOP, and only if
    /// `send_stop` is set, so a register pointer can be written without releasing the bus.
    /// # Errors
    /// Returns an error on any bus failure; nothing already on the wire is undone
    pub fn write_block(&mut self, address: u8, bytes: &[u8], send_stop: bool) -> Result<(), Error> {
        Self::check_address(address)?;
        self.reset()?;
        debug!(node = %self.node, address, n = bytes.len(), send_stop, "I2C write");
        self.send_command_and_write(
            Command::new()
                .with_start()
                .with_stop(send_stop && bytes.is_empty()),
            address << 1,
        )?;
        for (idx, byte) in bytes.iter().enumerate() {
            let last = idx + 1 == bytes.len();
            self.send_command_and_write(Command::new().with_stop(send_stop && last), *byte)?;
        }
        Ok(())
    }

    /// Read `n` bytes from the slave at `address`. The final byte is NAKed and followed by STOP.
    /// # Errors
    /// Returns an error on any bus failure
    pub fn read_block(&mut self, address: u8, n: usize) -> Result<Vec<u8>, Error> {
        Self::check_address(address)?;
        self.reset()?;
        debug!(node = %self.node, address, n, "I2C read");
        self.send_command_and_write(
            Command::new().with_start().with_stop(n == 0),
            (address << 1) | 0x01,
        )?;
        (0..n)
            .map(|idx| {
                let cmd = if idx + 1 == n {
                    Command::new().with_stop(true).with_ack()
                } else {
                    Command::new()
                };
                self.send_command_and_read(cmd)
            })
            .collect()
    }

    /// Read `n` bytes starting at sub-register `register` of the slave at `address`
    /// # Errors
    /// Returns an error on any bus failure
    pub fn read_array(&mut self, address: u8, register: u8, n: usize) -> Result<Vec<u8>, Error> {
        self.write_block(address, &[register], false)?;
        self.read_block(address, n)
    }

    /// Write `data` starting at sub-register `register` of the slave at `address`
    /// # Errors
    /// Returns an error on any bus failure
    pub fn write_array(
        &mut self,
        address: u8,
        register: u8,
        data: &[u8],
        send_stop: bool,
    ) -> Result<(), Error> {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(register);
        payload.extend_from_slice(data);
        self.write_block(address, &payload, send_stop)
    }

    /// Check whether a slave acknowledges its address. Never fails; any bus error reads as absent.
    pub fn ping(&mut self, address: u8) -> bool {
        let result = Self::check_address(address)
            .and_then(|()| self.reset())
            .and_then(|_| {
                self.send_command_and_write(
                    Command::new().with_start().with_stop(true),
                    address << 1,
                )
            });
        match result {
            Ok(()) => true,
            Err(e) => {
                trace!(node = %self.node, address, error = %e, "I2C ping failed");
                false
            }
        }
    }

    /// Ping every 7-bit address and return those that responded
    pub fn scan(&mut self) -> Vec<u8> {
        let found: Vec<u8> = (0..SCAN_LIMIT).filter(|&addr| self.ping(addr)).collect();
        debug!(node = %self.node, ?found, "I2C scan");
        found
    }
}
