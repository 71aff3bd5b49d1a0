//! COMA Ring Tests.
//!
//! Drives the ring with several clients contending for the same lines and
//! checks token conservation every cycle, read-your-writes through the merge
//! buffer, and that a vetoed update holds its write back.

use mgsim_core::common::{ClientId, MemAddr, WriteTag};
use mgsim_core::config::{ComaConfig, MemoryConfig};
use mgsim_core::memory::{ComaMemory, MemResult, Memory, Payload};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::harness::init_tracing;
use crate::common::mocks::RecordingClient;

const LINE_SIZE: u64 = 16;
const LINES: u64 = 8;
const CLIENTS: usize = 4;
/// Bytes of every line owned by one client.
const SLOT: u64 = 2;

fn memory_config() -> MemoryConfig {
    MemoryConfig {
        size: 4096,
        line_size: LINE_SIZE as usize,
        base_latency: 3,
        line_latency: 1,
        ..MemoryConfig::default()
    }
}

fn coma() -> ComaMemory {
    let coma = ComaConfig {
        caches_per_ring: 2,
        rings: 2,
        sets: 4,
        associativity: 2,
        ..ComaConfig::default()
    };
    ComaMemory::new(&memory_config(), &coma).unwrap()
}

/// Two rings of two caches with one set each, so every line competes for
/// the same ways, the same victim entry and the same merge slot.
fn tight_coma(associativity: usize) -> ComaMemory {
    let coma = ComaConfig {
        caches_per_ring: 2,
        rings: 2,
        sets: 1,
        associativity,
        merge_slots: 1,
        victim_entries: 1,
        ..ComaConfig::default()
    };
    ComaMemory::new(&memory_config(), &coma).unwrap()
}

fn register(mem: &mut ComaMemory, n: usize) -> Vec<ClientId> {
    (0..n)
        .map(|i| mem.register_client(&format!("c{i}")).unwrap())
        .collect()
}

/// Each client owns `SLOT` bytes of every line.
fn slot(line: u64, client: usize) -> MemAddr {
    MemAddr(line * LINE_SIZE + client as u64 * SLOT)
}

/// Runs until idle or `limit` cycles; returns the cycle it went idle at.
fn drain(mem: &mut ComaMemory, clients: &mut Vec<RecordingClient>, limit: u64) -> Option<u64> {
    (1..limit).find(|&now| {
        let _ = mem.cycle(now, &mut *clients).unwrap();
        mem.is_idle()
    })
}

// ══════════════════════════════════════════════════════════
// 1. Token conservation and progress under contention
// ══════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug)]
enum Op {
    Read(u64),
    Write(u64, u16),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..LINES).prop_map(Op::Read),
        (0..LINES, any::<u16>()).prop_map(|(l, v)| Op::Write(l, v)),
    ]
}

/// Runs one program per client, each client waiting for its previous
/// operation. Checks tokens every cycle, every read against the client's
/// own last write, and that the ring drains with every request answered.
fn run_programs(mut mem: ComaMemory, programs: &[Vec<Op>], limit: u64) -> Result<(), TestCaseError> {
    let n = programs.len();
    let ids = register(&mut mem, n);
    let mut clients: Vec<RecordingClient> = (0..n).map(|_| RecordingClient::default()).collect();
    let mut model = vec![[0u16; LINES as usize]; n];
    let mut next = vec![0usize; n];
    // outstanding op and the callback count it was issued at
    let mut waiting: Vec<Option<(Op, usize)>> = vec![None; n];
    let mut finished = false;

    for now in 1..limit {
        for c in 0..n {
            if let Some((op, base)) = waiting[c] {
                let done = match op {
                    Op::Read(line) => match clients[c].reads.get(base) {
                        Some((_, _, data)) => {
                            prop_assert_eq!(&data[..], &model[c][line as usize].to_le_bytes()[..]);
                            true
                        }
                        None => false,
                    },
                    Op::Write(..) => clients[c].writes.len() > base,
                };
                if !done {
                    continue;
                }
                waiting[c] = None;
            }
            let Some(&op) = programs[c].get(next[c]) else {
                continue;
            };
            match op {
                Op::Read(line) => match mem.read(ids[c], slot(line, c), SLOT as usize).unwrap() {
                    MemResult::Ready(data) => {
                        prop_assert_eq!(&data[..], &model[c][line as usize].to_le_bytes()[..]);
                        next[c] += 1;
                    }
                    MemResult::Delayed => {
                        waiting[c] = Some((op, clients[c].reads.len()));
                        next[c] += 1;
                    }
                    MemResult::Failed => {}
                },
                Op::Write(line, value) => {
                    let base = clients[c].writes.len();
                    let res = mem
                        .write(
                            ids[c],
                            slot(line, c),
                            Payload::from_slice(&value.to_le_bytes()),
                            WriteTag(next[c] as u64),
                            &mut clients,
                        )
                        .unwrap();
                    if !res.is_failed() {
                        model[c][line as usize] = value;
                        if res.is_delayed() {
                            waiting[c] = Some((op, base));
                        }
                        next[c] += 1;
                    }
                }
            }
        }

        let _ = mem.cycle(now, &mut clients).unwrap();
        mem.check_tokens().unwrap();

        let drained = (0..n).all(|c| waiting[c].is_none() && next[c] == programs[c].len());
        if drained && mem.is_idle() {
            finished = true;
            break;
        }
    }

    prop_assert!(finished, "ring did not drain: {:?}", mem.dump_state());
    let caches = mem.num_caches();
    for line in 0..LINES {
        prop_assert_eq!(mem.census(MemAddr(line * LINE_SIZE)), (caches, 1));
        for c in 0..n {
            prop_assert_eq!(
                mem.peek(slot(line, c), SLOT as usize).unwrap(),
                model[c][line as usize].to_le_bytes().to_vec()
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn tokens_are_conserved(programs in prop::collection::vec(prop::collection::vec(op(), 0..12), CLIENTS)) {
        run_programs(coma(), &programs, 50_000)?;
    }

    #[test]
    fn conflicting_lines_drain(
        associativity in 1usize..=2,
        programs in prop::collection::vec(prop::collection::vec(op(), 0..10), 2 * CLIENTS),
    ) {
        // two clients per cache
        run_programs(tight_coma(associativity), &programs, 200_000)?;
    }
}

#[test]
fn lines_sharing_one_way_both_complete() {
    init_tracing();
    let coma = ComaConfig {
        caches_per_ring: 1,
        rings: 1,
        sets: 1,
        associativity: 1,
        merge_slots: 1,
        victim_entries: 1,
        ..ComaConfig::default()
    };
    let mut mem = ComaMemory::new(&memory_config(), &coma).unwrap();
    let ids = register(&mut mem, 2);
    let mut clients: Vec<RecordingClient> = (0..2).map(|_| RecordingClient::default()).collect();
    mem.load(MemAddr(0x00), &[1, 1]).unwrap();
    mem.load(MemAddr(0x20), &[2, 2]).unwrap();

    assert!(mem.read(ids[0], MemAddr(0x00), 2).unwrap().is_delayed());
    assert!(mem.read(ids[1], MemAddr(0x20), 2).unwrap().is_delayed());
    assert!(drain(&mut mem, &mut clients, 10_000).is_some(), "{:?}", mem.dump_state());

    assert_eq!(clients[0].reads.len(), 1);
    assert_eq!(clients[0].reads[0].2, vec![1, 1]);
    assert_eq!(clients[1].reads.len(), 1);
    assert_eq!(clients[1].reads[0].2, vec![2, 2]);
    assert!(mem.stats().evictions >= 1);
    mem.check_line(MemAddr(0x00)).unwrap();
    mem.check_line(MemAddr(0x20)).unwrap();
}

// ══════════════════════════════════════════════════════════
// 2. Merge-store buffer
// ══════════════════════════════════════════════════════════

#[test]
fn merged_writes_are_read_back() {
    init_tracing();
    let mut mem = coma();
    // clients 0 and 4 share cache 0
    let ids = register(&mut mem, 5);
    let mut clients: Vec<RecordingClient> = (0..5).map(|_| RecordingClient::default()).collect();
    assert_eq!(mem.cache_of(ids[0]), mem.cache_of(ids[4]));

    let lo = mem
        .write(ids[0], MemAddr(0x40), Payload::from_slice(&[1, 2, 3, 4]), WriteTag(1), &mut clients)
        .unwrap();
    let hi = mem
        .write(ids[4], MemAddr(0x44), Payload::from_slice(&[5, 6, 7, 8]), WriteTag(2), &mut clients)
        .unwrap();
    assert!(lo.is_delayed());
    assert!(hi.is_delayed());
    assert!(mem.read(ids[0], MemAddr(0x40), 8).unwrap().is_delayed());

    let _ = drain(&mut mem, &mut clients, 2_000);

    assert!(mem.is_idle());
    assert_eq!(clients[0].writes.len(), 1);
    assert_eq!(clients[4].writes.len(), 1);
    assert_eq!(clients[0].reads.len(), 1);
    assert_eq!(clients[0].reads[0].2, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(mem.peek(MemAddr(0x40), 8).unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    let stats = mem.stats();
    assert!(stats.merge_allocations >= 1);
    assert!(stats.merges >= 1);
    mem.check_line(MemAddr(0x40)).unwrap();
}

#[test]
fn hit_after_write_is_immediate() {
    let mut mem = coma();
    let ids = register(&mut mem, 2);
    let mut clients: Vec<RecordingClient> = (0..2).map(|_| RecordingClient::default()).collect();

    let res = mem
        .write(ids[0], MemAddr(0x20), Payload::from_slice(&[0xaa; 4]), WriteTag(0), &mut clients)
        .unwrap();
    assert!(res.is_delayed());
    let _ = drain(&mut mem, &mut clients, 2_000);
    assert_eq!(clients[0].writes.len(), 1);
    assert_eq!(
        mem.read(ids[0], MemAddr(0x20), 4).unwrap(),
        MemResult::Ready(Payload::from_slice(&[0xaa; 4]))
    );
    assert!(mem.stats().read_hits >= 1);
}

// ══════════════════════════════════════════════════════════
// 3. Update snoops
// ══════════════════════════════════════════════════════════

#[test]
fn vetoed_update_holds_the_write() {
    init_tracing();
    let mut mem = coma();
    let ids = register(&mut mem, 2);
    let mut clients = vec![
        RecordingClient::default(),
        RecordingClient {
            veto: true,
            ..RecordingClient::default()
        },
    ];

    let res = mem
        .write(ids[0], MemAddr(0x40), Payload::from_slice(&[9, 9]), WriteTag(5), &mut clients)
        .unwrap();
    assert!(res.is_delayed());

    let mut now = 1;
    while now < 400 {
        let _ = mem.cycle(now, &mut clients).unwrap();
        now += 1;
    }
    assert!(clients[0].writes.is_empty());
    assert!(clients.iter().all(|c| c.snoops.is_empty()));
    assert!(!mem.is_idle());
    assert!(mem.stats().snoop_vetoes >= 1);
    assert!(!mem.dump_state().is_empty());

    clients[1].veto = false;
    while now < 2_000 && !mem.is_idle() {
        let _ = mem.cycle(now, &mut clients).unwrap();
        now += 1;
    }
    assert!(mem.is_idle());
    assert_eq!(clients[0].writes.len(), 1);
    assert_eq!(clients[0].writes[0].1, WriteTag(5));
    assert!(clients[1].snoops.contains(&(MemAddr(0x40), vec![9, 9])));
    assert_eq!(mem.peek(MemAddr(0x40), 2).unwrap(), vec![9, 9]);
}
