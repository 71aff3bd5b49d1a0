//! Micro-ops and built-in workload generators.
//!
//! Threads run straight-line programs of a handful of micro-ops; registers
//! are numbered within the thread's window. The generators build one program
//! per thread for the workload named in the configuration:
//! 1. **Stream:** Every thread walks its own region, loading a word, adding
//!    one and storing it back.
//! 2. **Shared:** Every thread increments its own counter, and the counters of
//!    neighbouring threads share lines.
//! 3. **Idle:** No threads at all.

use std::fmt;

use crate::common::{MemAddr, REGISTER_WIDTH, SimError, SimResult};
use crate::config::{Config, WorkloadKind};

/// One micro-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicroOp {
    /// `rd <- mem[addr..addr + size]`.
    Load {
        /// Destination register.
        rd: usize,
        /// Address to load from.
        addr: MemAddr,
        /// Bytes loaded, at most a register.
        size: usize,
        /// Sign-extend instead of zero-extend.
        sign_extend: bool,
    },
    /// `mem[addr..addr + size] <- rs`.
    Store {
        /// Source register.
        rs: usize,
        /// Address to store to.
        addr: MemAddr,
        /// Bytes stored, the low bytes of `rs`.
        size: usize,
    },
    /// `rd <- rs + imm`.
    AddImm {
        /// Destination register.
        rd: usize,
        /// Source register.
        rs: usize,
        /// Immediate.
        imm: i64,
    },
    /// Ends the thread.
    Halt,
}

impl fmt::Display for MicroOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { rd, addr, size, .. } => write!(f, "ld{size} r{rd}, [{addr}]"),
            Self::Store { rs, addr, size } => write!(f, "st{size} r{rs}, [{addr}]"),
            Self::AddImm { rd, rs, imm } => write!(f, "addi r{rd}, r{rs}, {imm}"),
            Self::Halt => write!(f, "halt"),
        }
    }
}

/// A thread program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program(Vec<MicroOp>);

impl Program {
    /// Wraps a list of micro-ops.
    pub const fn new(ops: Vec<MicroOp>) -> Self {
        Self(ops)
    }

    /// Micro-op at `pc`.
    pub fn get(&self, pc: usize) -> Option<MicroOp> {
        self.0.get(pc).copied()
    }

    /// Number of micro-ops.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the program has no micro-ops.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the micro-ops.
    pub fn iter(&self) -> impl Iterator<Item = &MicroOp> {
        self.0.iter()
    }
}

const WORD: u64 = REGISTER_WIDTH as u64;

/// Load, increment and store back one word.
fn increment(ops: &mut Vec<MicroOp>, addr: MemAddr) {
    ops.extend([
        MicroOp::Load {
            rd: 0,
            addr,
            size: REGISTER_WIDTH,
            sign_extend: false,
        },
        MicroOp::AddImm { rd: 1, rs: 0, imm: 1 },
        MicroOp::Store {
            rs: 1,
            addr,
            size: REGISTER_WIDTH,
        },
    ]);
}

/// Builds the programs for the threads of core `core`.
///
/// Thread `t` of core `c` is global thread `c * threads_per_core + t`.
pub fn generate(config: &Config, core: usize) -> SimResult<Vec<Program>> {
    let w = &config.workload;
    let threads = config.core.threads_per_core;
    let total_threads = (config.core.cores * threads) as u64;
    let ops = w.ops_per_thread as u64;

    if w.base % WORD != 0 {
        return Err(SimError::Config(format!(
            "workload base {:#x} is not {WORD}-byte aligned",
            w.base
        )));
    }
    let end = match w.kind {
        WorkloadKind::Idle => return Ok(Vec::new()),
        WorkloadKind::Stream => {
            if w.stride % WORD != 0 || w.stride == 0 {
                return Err(SimError::Config(format!(
                    "stream stride {} must be a non-zero multiple of {WORD}",
                    w.stride
                )));
            }
            w.base + total_threads * ops * w.stride
        }
        WorkloadKind::Shared => w.base + total_threads * WORD,
    };
    if end > config.memory.size as u64 {
        return Err(SimError::Config(format!(
            "workload touches up to {end:#x} but memory is {:#x} bytes",
            config.memory.size
        )));
    }

    let programs = (0..threads)
        .map(|t| {
            let global = (core * threads + t) as u64;
            let mut body = Vec::with_capacity(w.ops_per_thread * 3 + 1);
            for i in 0..ops {
                let addr = match w.kind {
                    WorkloadKind::Stream => MemAddr(w.base + (global * ops + i) * w.stride),
                    WorkloadKind::Shared | WorkloadKind::Idle => {
                        MemAddr(w.base + global * WORD)
                    }
                };
                increment(&mut body, addr);
            }
            body.push(MicroOp::Halt);
            Program::new(body)
        })
        .collect();
    Ok(programs)
}
