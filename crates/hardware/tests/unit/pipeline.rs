//! Pipeline Memory Stage Tests.
//!
//! Runs small hand-written programs through a real core and checks what
//! reaches memory: sign extension of narrow loads, chaining of loads to a
//! line already in flight, atomicity of a refused request, and the handling
//! of invalid and line-crossing addresses.

use mgsim_core::common::{ClientId, MemAddr, RegAddr, SimError, SimResult, WriteTag};
use mgsim_core::config::{Config, MemoryKind, WorkloadKind};
use mgsim_core::core::regfile::RegState;
use mgsim_core::core::workload::{MicroOp, Program};
use mgsim_core::kernel::{Activity, Cycle};
use mgsim_core::memory::{ClientSet, FlatMemory, MemResult, Memory, Payload};
use mgsim_core::sim::StopReason;
use mgsim_core::stats::MemoryStats;
use mgsim_core::Simulator;
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::{grid_config, init_tracing};

fn config() -> Config {
    grid_config(MemoryKind::Simple, WorkloadKind::Idle, 0)
}

fn load(rd: usize, addr: u64, size: usize, sign_extend: bool) -> MicroOp {
    MicroOp::Load {
        rd,
        addr: MemAddr(addr),
        size,
        sign_extend,
    }
}

fn store(rs: usize, addr: u64, size: usize) -> MicroOp {
    MicroOp::Store {
        rs,
        addr: MemAddr(addr),
        size,
    }
}

/// Runs one program on core 0 to completion.
fn run_one(sim: &mut Simulator, ops: Vec<MicroOp>) -> SimResult<StopReason> {
    sim.spawn(0, vec![Program::new(ops)])?;
    Ok(sim.run(10_000)?.reason)
}

// ══════════════════════════════════════════════════════════
// 1. Load data path
// ══════════════════════════════════════════════════════════

#[rstest]
#[case(&[0xff], 1, true, u64::MAX)]
#[case(&[0xff], 1, false, 0xff)]
#[case(&[0xff, 0x80], 2, true, 0xffff_ffff_ffff_80ff)]
#[case(&[0x34, 0x12], 2, true, 0x1234)]
#[case(&[1, 2, 3, 4, 5, 6, 7, 8], 8, true, 0x0807_0605_0403_0201)]
fn narrow_loads_are_extended(
    #[case] bytes: &[u8],
    #[case] size: usize,
    #[case] sign_extend: bool,
    #[case] expected: u64,
) {
    init_tracing();
    let mut sim = Simulator::new(config()).unwrap();
    sim.memory_mut().load(MemAddr(0x10), bytes).unwrap();

    let reason = run_one(
        &mut sim,
        vec![load(0, 0x10, size, sign_extend), store(0, 0x80, 8), MicroOp::Halt],
    )
    .unwrap();

    assert_eq!(reason, StopReason::Idle);
    assert_eq!(sim.peek(MemAddr(0x80), 8).unwrap(), expected.to_le_bytes().to_vec());
}

#[test]
fn loads_to_one_line_share_a_read() {
    let mut sim = Simulator::new(config()).unwrap();
    sim.memory_mut().load(MemAddr(0x00), &11u64.to_le_bytes()).unwrap();
    sim.memory_mut().load(MemAddr(0x08), &22u64.to_le_bytes()).unwrap();

    sim.spawn(
        0,
        vec![
            Program::new(vec![load(0, 0x00, 8, false), store(0, 0x100, 8), MicroOp::Halt]),
            Program::new(vec![load(0, 0x08, 8, false), store(0, 0x108, 8), MicroOp::Halt]),
        ],
    )
    .unwrap();
    assert_eq!(sim.run(10_000).unwrap().reason, StopReason::Idle);

    assert_eq!(sim.peek(MemAddr(0x100), 8).unwrap(), 11u64.to_le_bytes().to_vec());
    assert_eq!(sim.peek(MemAddr(0x108), 8).unwrap(), 22u64.to_le_bytes().to_vec());
    let stats = sim.stats();
    assert_eq!(stats.loads, 2);
    assert_eq!(stats.loads_chained, 1);
    assert_eq!(stats.memory.reads, 1);
}

#[test]
fn dependent_add_waits_for_the_load() {
    let mut sim = Simulator::new(config()).unwrap();
    sim.memory_mut().load(MemAddr(0x20), &41u64.to_le_bytes()).unwrap();

    let reason = run_one(
        &mut sim,
        vec![
            load(0, 0x20, 8, false),
            MicroOp::AddImm { rd: 1, rs: 0, imm: 1 },
            store(1, 0x20, 8),
            MicroOp::Halt,
        ],
    )
    .unwrap();

    assert_eq!(reason, StopReason::Idle);
    assert_eq!(sim.peek(MemAddr(0x20), 8).unwrap(), 42u64.to_le_bytes().to_vec());
    let stats = sim.stats();
    assert!(stats.suspensions >= 1);
    assert_eq!(stats.wakeups, stats.suspensions);
    assert_eq!(stats.families_completed, 1);
}

// ══════════════════════════════════════════════════════════
// 2. Refused requests leave no trace
// ══════════════════════════════════════════════════════════

/// Flat memory that refuses the first `refuse` reads.
#[derive(Debug)]
struct RefusingMemory {
    inner: FlatMemory,
    refuse: usize,
}

impl Memory for RefusingMemory {
    fn name(&self) -> &str {
        "refusing"
    }

    fn register_client(&mut self, name: &str) -> SimResult<ClientId> {
        self.inner.register_client(name)
    }

    fn read(&mut self, client: ClientId, addr: MemAddr, size: usize) -> SimResult<MemResult<Payload>> {
        if self.refuse > 0 {
            self.refuse -= 1;
            return Ok(MemResult::Failed);
        }
        self.inner.read(client, addr, size)
    }

    fn write(
        &mut self,
        client: ClientId,
        addr: MemAddr,
        data: Payload,
        tag: WriteTag,
        clients: &mut dyn ClientSet,
    ) -> SimResult<MemResult<()>> {
        self.inner.write(client, addr, data, tag, clients)
    }

    fn cycle(&mut self, now: Cycle, clients: &mut dyn ClientSet) -> SimResult<Activity> {
        self.inner.cycle(now, clients)
    }

    fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    fn check_address(&self, addr: MemAddr, size: usize) -> bool {
        self.inner.check_address(addr, size)
    }

    fn load(&mut self, addr: MemAddr, data: &[u8]) -> SimResult<()> {
        self.inner.load(addr, data)
    }

    fn peek(&self, addr: MemAddr, len: usize) -> SimResult<Vec<u8>> {
        self.inner.peek(addr, len)
    }

    fn dump_state(&self) -> Vec<String> {
        self.inner.dump_state()
    }

    fn stats(&self) -> MemoryStats {
        self.inner.stats()
    }
}

#[test]
fn refused_read_leaves_register_untouched() {
    init_tracing();
    let config = config();
    let memory = RefusingMemory {
        inner: FlatMemory::from_config(&config.memory).unwrap(),
        refuse: 20,
    };
    let mut sim = Simulator::with_memory(config, Box::new(memory)).unwrap();
    sim.memory_mut().load(MemAddr(0x40), &7u64.to_le_bytes()).unwrap();
    sim.spawn(
        0,
        vec![Program::new(vec![load(0, 0x40, 8, false), store(0, 0x48, 8), MicroOp::Halt])],
    )
    .unwrap();

    for _ in 0..10 {
        let _ = sim.tick().unwrap();
        let core = &sim.cores()[0];
        assert_eq!(core.regs().read(RegAddr(0)).unwrap(), RegState::Empty);
        assert_eq!(core.stats().loads, 0);
    }
    assert!(sim.cores()[0].stats().stalls_mem >= 8);

    assert_eq!(sim.run(10_000).unwrap().reason, StopReason::Idle);
    assert_eq!(sim.peek(MemAddr(0x48), 8).unwrap(), 7u64.to_le_bytes().to_vec());
    assert_eq!(sim.stats().loads, 1);
}

// ══════════════════════════════════════════════════════════
// 3. Invalid accesses
// ══════════════════════════════════════════════════════════

#[test]
fn load_outside_memory_clears_the_register() {
    let mut sim = Simulator::new(config()).unwrap();
    let reason = run_one(&mut sim, vec![load(0, 0x10_0000, 8, false), MicroOp::Halt]).unwrap();
    assert_eq!(reason, StopReason::Idle);
    let stats = sim.stats();
    assert_eq!(stats.loads_invalid, 1);
    assert_eq!(stats.memory.reads, 0);
}

#[test]
fn using_a_cleared_register_is_illegal() {
    let mut sim = Simulator::new(config()).unwrap();
    let err = run_one(
        &mut sim,
        vec![load(0, 0x10_0000, 8, false), store(0, 0x20, 8), MicroOp::Halt],
    )
    .unwrap_err();
    assert!(matches!(err, SimError::IllegalInstruction { pc: 1, .. }), "{err}");
}

#[rstest]
#[case(0x3e, 4)]
#[case(0x3f, 2)]
#[case(0x00, 0)]
#[case(0x00, 16)]
fn bad_access_shape_is_invalid_argument(#[case] addr: u64, #[case] size: usize) {
    let mut sim = Simulator::new(config()).unwrap();
    let err = run_one(&mut sim, vec![load(0, addr, size, false), MicroOp::Halt]).unwrap_err();
    assert!(matches!(err, SimError::InvalidArgument(_)), "{err}");
}

#[test]
fn register_outside_window_is_illegal() {
    let mut sim = Simulator::new(config()).unwrap();
    // four registers per thread
    let err = run_one(&mut sim, vec![load(4, 0x00, 8, false), MicroOp::Halt]).unwrap_err();
    assert!(matches!(err, SimError::IllegalInstruction { pc: 0, .. }), "{err}");
}
