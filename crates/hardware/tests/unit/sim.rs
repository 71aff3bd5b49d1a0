//! Whole-Grid Simulation Tests.
//!
//! Runs the built-in workloads on every memory backend and checks the final
//! memory image, detects a deadlock against a backend that never answers, and
//! loads raw images from disk.

use std::io::Write;

use mgsim_core::common::{ClientId, MemAddr, SimError, SimResult, WriteTag};
use mgsim_core::config::{MemoryKind, WorkloadKind};
use mgsim_core::core::workload::{MicroOp, Program};
use mgsim_core::kernel::{Activity, Cycle};
use mgsim_core::memory::{ClientSet, MemResult, Memory, Payload};
use mgsim_core::sim::StopReason;
use mgsim_core::sim::loader::{load_image, parse_image_arg};
use mgsim_core::stats::MemoryStats;
use mgsim_core::Simulator;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::{grid_config, init_tracing};

const OPS: usize = 3;
/// 2 cores of 2 threads.
const THREADS: usize = 4;

fn words(sim: &Simulator, count: usize) -> Vec<u64> {
    sim.peek(MemAddr(0), count * 8)
        .unwrap()
        .chunks(8)
        .map(|w| u64::from_le_bytes(w.try_into().unwrap()))
        .collect()
}

// ══════════════════════════════════════════════════════════
// 1. Built-in workloads on every backend
// ══════════════════════════════════════════════════════════

#[rstest]
fn stream_increments_every_word(
    #[values(MemoryKind::Simple, MemoryKind::Parallel, MemoryKind::Banked, MemoryKind::Coma)]
    kind: MemoryKind,
) {
    init_tracing();
    let mut sim = Simulator::new(grid_config(kind, WorkloadKind::Stream, OPS)).unwrap();
    sim.load_workload().unwrap();
    let outcome = sim.run(200_000).unwrap();

    assert_eq!(outcome.reason, StopReason::Idle);
    assert_eq!(words(&sim, THREADS * OPS), vec![1; THREADS * OPS]);
    assert_eq!(words(&sim, THREADS * OPS + 1)[THREADS * OPS], 0);
    let stats = sim.stats();
    assert_eq!(stats.loads, (THREADS * OPS) as u64);
    assert_eq!(stats.stores, (THREADS * OPS) as u64);
    assert_eq!(stats.families_completed, 2);
    assert_eq!(stats.cycles, outcome.cycles);
}

#[rstest]
fn shared_counters_reach_op_count(
    #[values(MemoryKind::Simple, MemoryKind::Parallel, MemoryKind::Banked, MemoryKind::Coma)]
    kind: MemoryKind,
) {
    init_tracing();
    let mut sim = Simulator::new(grid_config(kind, WorkloadKind::Shared, OPS)).unwrap();
    sim.load_workload().unwrap();
    let outcome = sim.run(200_000).unwrap();

    assert_eq!(outcome.reason, StopReason::Idle);
    assert_eq!(words(&sim, THREADS), vec![OPS as u64; THREADS]);
    assert!(sim.memory().is_idle());
    assert!(sim.cores().iter().all(|c| c.dump_state().is_none()));
}

#[test]
fn workload_past_memory_is_a_config_error() {
    let mut config = grid_config(MemoryKind::Simple, WorkloadKind::Stream, OPS);
    config.workload.base = 64 * 1024 - 8;
    let mut sim = Simulator::new(config).unwrap();
    assert!(matches!(sim.load_workload(), Err(SimError::Config(_))));
}

// ══════════════════════════════════════════════════════════
// 2. Deadlock detection
// ══════════════════════════════════════════════════════════

/// Accepts every request and never completes any of them.
#[derive(Debug, Default)]
struct SilentMemory {
    clients: usize,
    outstanding: usize,
}

impl Memory for SilentMemory {
    fn name(&self) -> &str {
        "silent"
    }

    fn register_client(&mut self, _name: &str) -> SimResult<ClientId> {
        self.clients += 1;
        Ok(ClientId(self.clients - 1))
    }

    fn read(&mut self, _client: ClientId, _addr: MemAddr, _size: usize) -> SimResult<MemResult<Payload>> {
        self.outstanding += 1;
        Ok(MemResult::Delayed)
    }

    fn write(
        &mut self,
        _client: ClientId,
        _addr: MemAddr,
        _data: Payload,
        _tag: WriteTag,
        _clients: &mut dyn ClientSet,
    ) -> SimResult<MemResult<()>> {
        self.outstanding += 1;
        Ok(MemResult::Delayed)
    }

    fn cycle(&mut self, _now: Cycle, _clients: &mut dyn ClientSet) -> SimResult<Activity> {
        Ok(Activity {
            progressed: false,
            busy: !self.is_idle(),
        })
    }

    fn is_idle(&self) -> bool {
        self.outstanding == 0
    }

    fn check_address(&self, addr: MemAddr, size: usize) -> bool {
        addr.val() + size as u64 <= 4096
    }

    fn load(&mut self, _addr: MemAddr, _data: &[u8]) -> SimResult<()> {
        Ok(())
    }

    fn peek(&self, _addr: MemAddr, len: usize) -> SimResult<Vec<u8>> {
        Ok(vec![0; len])
    }

    fn dump_state(&self) -> Vec<String> {
        vec![format!("silent: {} requests outstanding", self.outstanding)]
    }

    fn stats(&self) -> MemoryStats {
        MemoryStats::default()
    }
}

#[test]
fn lost_completion_is_reported_as_deadlock() {
    init_tracing();
    let config = grid_config(MemoryKind::Simple, WorkloadKind::Idle, 0);
    let threshold = config.general.deadlock_threshold;
    let mut sim = Simulator::with_memory(config, Box::<SilentMemory>::default()).unwrap();
    sim.spawn(
        0,
        vec![Program::new(vec![
            MicroOp::Load {
                rd: 0,
                addr: MemAddr(0x40),
                size: 8,
                sign_extend: false,
            },
            MicroOp::AddImm { rd: 1, rs: 0, imm: 1 },
            MicroOp::Halt,
        ])],
    )
    .unwrap();

    let err = sim.run(100_000).unwrap_err();
    let (idle_cycles, components) = match err {
        SimError::Deadlock {
            idle_cycles,
            components,
            ..
        } => (idle_cycles, components),
        other => panic!("expected a deadlock, got {other}"),
    };
    assert_eq!(idle_cycles, threshold);
    assert!(components.iter().any(|c| c.starts_with("silent: 1 requests")));
    assert!(components.iter().any(|c| c.starts_with("core0:") && c.contains("1 suspended")));
    assert!(!components.iter().any(|c| c.starts_with("core1")));
}

#[test]
fn client_ids_must_follow_core_order() {
    #[derive(Debug, Default)]
    struct Offset(SilentMemory);

    impl Memory for Offset {
        fn name(&self) -> &str {
            "offset"
        }
        fn register_client(&mut self, name: &str) -> SimResult<ClientId> {
            Ok(ClientId(self.0.register_client(name)?.0 + 1))
        }
        fn read(&mut self, c: ClientId, a: MemAddr, s: usize) -> SimResult<MemResult<Payload>> {
            self.0.read(c, a, s)
        }
        fn write(
            &mut self,
            c: ClientId,
            a: MemAddr,
            d: Payload,
            t: WriteTag,
            clients: &mut dyn ClientSet,
        ) -> SimResult<MemResult<()>> {
            self.0.write(c, a, d, t, clients)
        }
        fn cycle(&mut self, now: Cycle, clients: &mut dyn ClientSet) -> SimResult<Activity> {
            self.0.cycle(now, clients)
        }
        fn is_idle(&self) -> bool {
            self.0.is_idle()
        }
        fn check_address(&self, a: MemAddr, s: usize) -> bool {
            self.0.check_address(a, s)
        }
        fn load(&mut self, a: MemAddr, d: &[u8]) -> SimResult<()> {
            self.0.load(a, d)
        }
        fn peek(&self, a: MemAddr, len: usize) -> SimResult<Vec<u8>> {
            self.0.peek(a, len)
        }
        fn dump_state(&self) -> Vec<String> {
            self.0.dump_state()
        }
        fn stats(&self) -> MemoryStats {
            self.0.stats()
        }
    }

    let config = grid_config(MemoryKind::Simple, WorkloadKind::Idle, 0);
    assert!(matches!(
        Simulator::with_memory(config, Box::<Offset>::default()),
        Err(SimError::InvalidArgument(_))
    ));
}

// ══════════════════════════════════════════════════════════
// 3. Memory images
// ══════════════════════════════════════════════════════════

#[test]
fn image_seeds_a_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&41u64.to_le_bytes()).unwrap();
    file.flush().unwrap();

    let mut sim = Simulator::new(grid_config(MemoryKind::Banked, WorkloadKind::Idle, 0)).unwrap();
    let arg = format!("{}@0x100", file.path().display());
    let (path, addr) = parse_image_arg(&arg).unwrap();
    assert_eq!(addr, MemAddr(0x100));
    assert_eq!(load_image(sim.memory_mut(), &path, addr).unwrap(), 8);

    sim.spawn(
        1,
        vec![Program::new(vec![
            MicroOp::Load {
                rd: 2,
                addr,
                size: 8,
                sign_extend: false,
            },
            MicroOp::AddImm { rd: 3, rs: 2, imm: 1 },
            MicroOp::Store {
                rs: 3,
                addr,
                size: 8,
            },
            MicroOp::Halt,
        ])],
    )
    .unwrap();
    assert_eq!(sim.run(10_000).unwrap().reason, StopReason::Idle);
    assert_eq!(sim.peek(addr, 8).unwrap(), 42u64.to_le_bytes().to_vec());
}

#[test]
fn oversized_image_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0xee; 64]).unwrap();
    file.flush().unwrap();

    let mut sim = Simulator::new(grid_config(MemoryKind::Simple, WorkloadKind::Idle, 0)).unwrap();
    let err = load_image(sim.memory_mut(), file.path(), MemAddr(64 * 1024 - 32)).unwrap_err();
    assert!(matches!(err, SimError::InvalidArgument(_)));
    assert_eq!(sim.peek(MemAddr(64 * 1024 - 32), 32).unwrap(), vec![0; 32]);
}

#[test]
fn image_into_coma_is_visible_to_peek() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
    file.flush().unwrap();

    let mut sim = Simulator::new(grid_config(MemoryKind::Coma, WorkloadKind::Idle, 0)).unwrap();
    // spans a line boundary
    assert_eq!(load_image(sim.memory_mut(), file.path(), MemAddr(60)).unwrap(), 10);
    assert_eq!(sim.peek(MemAddr(60), 10).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
}
