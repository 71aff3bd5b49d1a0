//! Register File State Machine Tests.
//!
//! Verifies the write rules under arbitrary sequences: a refused or illegal
//! write never changes a slot, a slot never carries two pending loads, and
//! only the owning component completes a pending load.

use mgsim_core::common::{RegAddr, SimError, ThreadId};
use mgsim_core::core::regfile::{
    PendingLoad, RegState, RegValue, RegisterFile, ThreadWaker,
};
use mgsim_core::kernel::ComponentId;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const SLOTS: usize = 4;

struct Waker {
    allow: bool,
    woken: Vec<ThreadId>,
}

impl ThreadWaker for Waker {
    fn wake(&mut self, thread: ThreadId) -> bool {
        if self.allow {
            self.woken.push(thread);
        }
        self.allow
    }
}

fn pending(writer: u32) -> PendingLoad {
    PendingLoad {
        writer: ComponentId(writer),
        offset: 0,
        size: 8,
        sign_extend: false,
        next: None,
    }
}

#[derive(Clone, Debug)]
enum Op {
    Pending(usize, u32),
    Waiting(usize, usize),
    Full(usize, u32, u64),
    Empty(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SLOTS, 0..2u32).prop_map(|(r, w)| Op::Pending(r, w)),
        (0..SLOTS, 0..3usize).prop_map(|(r, t)| Op::Waiting(r, t)),
        (0..SLOTS, 0..2u32, any::<u64>()).prop_map(|(r, w, v)| Op::Full(r, w, v)),
        (0..SLOTS).prop_map(Op::Empty),
    ]
}

// ══════════════════════════════════════════════════════════
// 1. Properties over arbitrary write sequences
// ══════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn writes_respect_the_protocol(ops in prop::collection::vec((op(), any::<bool>()), 1..64)) {
        let mut regs = RegisterFile::new(SLOTS);
        for (op, allow) in ops {
            let (addr, value, writer) = match op {
                Op::Pending(r, w) => (r, RegValue::Pending(pending(w)), ComponentId(w)),
                Op::Waiting(r, t) => (r, RegValue::Waiting(ThreadId(t)), ComponentId(9)),
                Op::Full(r, w, v) => (r, RegValue::Full(v), ComponentId(w)),
                Op::Empty(r) => (r, RegValue::Empty, ComponentId(0)),
            };
            let addr = RegAddr(addr);
            let before = regs.read(addr).unwrap();
            let mut waker = Waker { allow, woken: Vec::new() };
            let result = regs.write(addr, value, writer, &mut waker);
            let after = regs.read(addr).unwrap();

            match &result {
                Err(e) => {
                    prop_assert!(matches!(e, SimError::RegisterProtocol { .. }), "{e}");
                    prop_assert_eq!(before, after);
                }
                Ok(false) => {
                    prop_assert!(!allow);
                    prop_assert_eq!(before, after);
                }
                Ok(true) => {}
            }

            // never two pending loads in one slot
            if matches!(value, RegValue::Pending(_)) && before.is_pending() {
                prop_assert!(result.is_err());
            }
            // only the owner completes a pending load
            if let (RegValue::Full(_), Some(load)) = (value, before.pending_load()) {
                if load.writer != writer {
                    prop_assert!(result.is_err());
                }
            }
            // a completed waiting slot wakes exactly its thread
            if let (RegValue::Full(v), RegState::Waiting { thread, load }) = (value, before) {
                if load.writer == writer && allow {
                    prop_assert_eq!(&waker.woken, &vec![thread]);
                    prop_assert_eq!(after, RegState::Full(v));
                }
            }
        }
    }
}

// ══════════════════════════════════════════════════════════
// 2. Two-phase writes
// ══════════════════════════════════════════════════════════

#[test]
fn propose_does_not_mutate() {
    let mut regs = RegisterFile::new(2);
    let mut waker = Waker { allow: true, woken: Vec::new() };
    assert!(regs
        .write(RegAddr(0), RegValue::Pending(pending(1)), ComponentId(1), &mut waker)
        .unwrap());
    let proposal = regs
        .propose_write(RegAddr(0), RegValue::Full(5), ComponentId(1))
        .unwrap();
    assert!(regs.read(RegAddr(0)).unwrap().is_pending());
    regs.commit_write(proposal).unwrap();
    assert_eq!(regs.read(RegAddr(0)).unwrap(), RegState::Full(5));
}

#[test]
fn out_of_range_register_is_invalid_argument() {
    let regs = RegisterFile::new(2);
    assert!(matches!(
        regs.read(RegAddr(2)),
        Err(SimError::InvalidArgument(_))
    ));
    assert!(regs
        .propose_write(RegAddr(7), RegValue::Full(0), ComponentId(0))
        .is_err());
}
