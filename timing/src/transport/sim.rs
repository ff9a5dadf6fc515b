//! A behavioral model of an OpenCores I2C core with slaves attached, used to test device drivers
//! end to end without hardware.
//!
//! Transfers complete instantly unless a stall is injected. Slaves are register files with an
//! auto-incrementing pointer set by the first byte written after their address, which is how
//! every peripheral on these boards behaves. Paged slaves additionally treat register `0x01` as
//! the page select for a 16-bit register space.

use super::{
    Batch,
    Deserialize,
    Error,
    Operation,
    Response,
    Serialize,
    Transport,
    TransportResult,
};
use crate::{
    core::register_path,
    i2c::{
        Command,
        Control,
        Status,
    },
};
use kstring::KString;
use std::collections::BTreeMap;

const PAGE_REGISTER: u8 = 0x01;

/// A simulated I2C slave
#[derive(Debug, Clone)]
pub struct SimSlave {
    memory: Vec<u8>,
    paged: bool,
    page: u8,
    pointer: u8,
    nack_writes: usize,
    writes: Vec<(u16, u8)>,
}

impl SimSlave {
    /// A slave with a flat 256-byte register space
    #[must_use]
    pub fn flat() -> Self {
        Self {
            memory: vec![0; 0x100],
            paged: false,
            page: 0,
            pointer: 0,
            nack_writes: 0,
            writes: vec![],
        }
    }

    /// A slave with a 16-bit register space selected through the page register
    #[must_use]
    pub fn paged() -> Self {
        Self {
            memory: vec![0; 0x1_0000],
            paged: true,
            ..Self::flat()
        }
    }

    /// Preload a register
    #[must_use]
    pub fn with(mut self, register: u16, value: u8) -> Self {
        let len = self.memory.len();
        self.memory[usize::from(register) % len] = value;
        self
    }

    /// Current contents of a register
    #[must_use]
    pub fn get(&self, register: u16) -> u8 {
        self.memory[usize::from(register) % self.memory.len()]
    }

    /// Every register write that was acknowledged, as (register, value), in order
    #[must_use]
    pub fn writes(&self) -> &[(u16, u8)] {
        &self.writes
    }

    /// NACK the next `n` data bytes written to registers (the pointer byte is still accepted)
    pub fn nack_next_writes(&mut self, n: usize) {
        self.nack_writes = n;
    }

    fn index(&self) -> u16 {
        if self.paged {
            u16::from_be_bytes([self.page, self.pointer])
        } else {
            u16::from(self.pointer)
        }
    }

    fn store(&mut self, value: u8) -> bool {
        if self.nack_writes > 0 {
            self.nack_writes -= 1;
            return false;
        }
        let idx = self.index();
        if self.paged && self.pointer == PAGE_REGISTER {
            self.page = value;
        }
        self.memory[usize::from(idx)] = value;
        self.writes.push((idx, value));
        self.pointer = self.pointer.wrapping_add(1);
        true
    }

    fn load(&mut self) -> u8 {
        let value = if self.paged && self.pointer == PAGE_REGISTER {
            self.page
        } else {
            self.memory[usize::from(self.index())]
        };
        self.pointer = self.pointer.wrapping_add(1);
        value
    }
}

#[derive(Debug, Copy, Clone)]
struct Transfer {
    address: u8,
    read: bool,
    pointer_set: bool,
}

/// A simulated I2C core exposing the five core registers under `node`
#[derive(Debug)]
pub struct SimI2c {
    ps_lo: KString,
    ps_hi: KString,
    ctrl: KString,
    data: KString,
    cmd_stat: KString,
    prescale: [u8; 2],
    control: Control,
    tx: u8,
    rx: u8,
    status: Status,
    held: bool,
    transfer: Option<Transfer>,
    slaves: BTreeMap<u8, SimSlave>,
    stall_polls: usize,
    lose_arbitration: usize,
    commands: Vec<Command>,
}

impl SimI2c {
    #[must_use]
    pub fn new(node: &str) -> Self {
        Self {
            ps_lo: register_path(node, "ps_lo"),
            ps_hi: register_path(node, "ps_hi"),
            ctrl: register_path(node, "ctrl"),
            data: register_path(node, "data"),
            cmd_stat: register_path(node, "cmd_stat"),
            prescale: [0, 0],
            control: Control::default(),
            tx: 0,
            rx: 0,
            status: Status::default(),
            held: false,
            transfer: None,
            slaves: BTreeMap::new(),
            stall_polls: 0,
            lose_arbitration: 0,
            commands: vec![],
        }
    }

    /// Attach a slave at `address`
    pub fn attach(&mut self, address: u8, slave: SimSlave) {
        self.slaves.insert(address, slave);
    }

    #[must_use]
    pub fn slave(&self, address: u8) -> Option<&SimSlave> {
        self.slaves.get(&address)
    }

    pub fn slave_mut(&mut self, address: u8) -> Option<&mut SimSlave> {
        self.slaves.get_mut(&address)
    }

    /// The prescale currently programmed into the core
    #[must_use]
    pub fn prescale(&self) -> u16 {
        u16::from_be_bytes(self.prescale)
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.control.enable
    }

    /// Keep the transfer-in-progress bit set for the next `polls` status reads
    pub fn stall(&mut self, polls: usize) {
        self.stall_polls = polls;
    }

    /// Lose arbitration on the next `n` commands
    pub fn lose_arbitration(&mut self, n: usize) {
        self.lose_arbitration = n;
    }

    /// Every non-empty command the core executed, in order
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    fn execute(&mut self, cmd: Command) {
        if cmd == Command::default() {
            return;
        }
        self.commands.push(cmd);
        if !self.control.enable {
            self.status.rx_nack = true;
            return;
        }
        if self.lose_arbitration > 0 {
            self.lose_arbitration -= 1;
            self.status.arbitration_lost = true;
            self.transfer = None;
            self.held = false;
            self.status.busy = false;
            return;
        }
        self.status.arbitration_lost = false;

        if cmd.start && cmd.write {
            self.held = true;
            let address = self.tx >> 1;
            let read = self.tx & 0x01 == 0x01;
            if self.slaves.contains_key(&address) {
                self.transfer = Some(Transfer {
                    address,
                    read,
                    pointer_set: false,
                });
                self.status.rx_nack = false;
            } else {
                self.transfer = None;
                self.status.rx_nack = true;
            }
        } else if cmd.write {
            let tx = self.tx;
            let acked = match self.transfer.as_mut() {
                Some(transfer) if !transfer.read => {
                    match self.slaves.get_mut(&transfer.address) {
                        Some(slave) if !transfer.pointer_set => {
                            slave.pointer = tx;
                            transfer.pointer_set = true;
                            true
                        }
                        Some(slave) => slave.store(tx),
                        None => false,
                    }
                }
                _ => false,
            };
            self.status.rx_nack = !acked;
        } else if cmd.read {
            self.rx = match self.transfer {
                Some(transfer) if transfer.read => self
                    .slaves
                    .get_mut(&transfer.address)
                    .map_or(0xFF, SimSlave::load),
                _ => 0xFF,
            };
            // The line carries the master's ACK/NACK
            self.status.rx_nack = cmd.ack;
        }

        if cmd.stop {
            self.held = false;
            self.transfer = None;
        }
        self.status.busy = self.held;
    }

    fn read_status(&mut self) -> TransportResult<u32> {
        let mut status = self.status;
        if self.stall_polls > 0 {
            self.stall_polls -= 1;
            status.transfer_in_progress = true;
        }
        status.serialize()
    }

    fn knows(&self, register: &str) -> bool {
        [
            &self.ps_lo,
            &self.ps_hi,
            &self.ctrl,
            &self.data,
            &self.cmd_stat,
        ]
        .iter()
        .any(|r| r.as_str() == register)
    }
}

impl Transport for SimI2c {
    #[allow(clippy::cast_possible_truncation)]
    fn dispatch(&mut self, batch: &Batch) -> TransportResult<Response> {
        for op in batch.operations() {
            if !self.knows(op.register()) {
                return Err(Error::MissingRegister(KString::from_ref(op.register())));
            }
        }
        let mut values = vec![];
        for op in batch.operations() {
            match op {
                Operation::Write { register, value } => {
                    let byte = *value as u8;
                    if *register == self.ps_lo {
                        self.prescale[1] = byte;
                    } else if *register == self.ps_hi {
                        self.prescale[0] = byte;
                    } else if *register == self.ctrl {
                        self.control = Control::deserialize(*value)?;
                    } else if *register == self.data {
                        self.tx = byte;
                    } else {
                        let cmd = Command::deserialize(*value)?;
                        self.execute(cmd);
                    }
                }
                Operation::Read { register } => {
                    let value = if *register == self.ps_lo {
                        u32::from(self.prescale[1])
                    } else if *register == self.ps_hi {
                        u32::from(self.prescale[0])
                    } else if *register == self.ctrl {
                        self.control.serialize()?
                    } else if *register == self.data {
                        u32::from(self.rx)
                    } else {
                        self.read_status()?
                    };
                    values.push(value);
                }
            }
        }
        Ok(Response::new(batch, values))
    }
}
