//! Flat Memory Backend Tests.
//!
//! Verifies completion timing, exactly-once delivery, full-buffer rejection,
//! snoop vetoes and per-client ordering for the simple, parallel and banked
//! arrangements.

use mgsim_core::common::{ClientId, MemAddr, WriteTag};
use mgsim_core::memory::{FlatMemory, MemResult, Memory, Payload};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::harness::{flat_config, init_tracing};
use crate::common::mocks::{MockClient, RecordingClient};

/// Cycles the memory from `from` to `to`, stamping clients with the cycle.
fn step(mem: &mut FlatMemory, clients: &mut Vec<RecordingClient>, from: u64, to: u64) {
    for now in from..to {
        for c in clients.iter_mut() {
            c.now = now;
        }
        let _ = mem.cycle(now, clients).unwrap();
    }
}

// ══════════════════════════════════════════════════════════
// 1. Timing determinism
// ══════════════════════════════════════════════════════════

#[rstest]
#[case(10, 2, 8, 12)]
#[case(10, 2, 64, 12)]
#[case(5, 3, 1, 8)]
#[case(0, 1, 32, 1)]
#[case(20, 4, 64, 24)]
fn read_completes_after_base_plus_lines(
    #[case] base: u64,
    #[case] per_line: u64,
    #[case] size: usize,
    #[case] latency: u64,
) {
    init_tracing();
    let mut mem = FlatMemory::simple(&flat_config(base, per_line, Some(4))).unwrap();
    let c = mem.register_client("c0").unwrap();
    let mut clients = vec![RecordingClient::default()];

    step(&mut mem, &mut clients, 0, 11);
    assert!(mem.read(c, MemAddr(0x40), size).unwrap().is_delayed());
    step(&mut mem, &mut clients, 11, 10 + latency + 20);

    assert_eq!(clients[0].reads.len(), 1);
    let (at, addr, data) = &clients[0].reads[0];
    assert_eq!(*at, 10 + latency);
    assert_eq!(*addr, MemAddr(0x40));
    assert_eq!(data.len(), size);
}

#[test]
fn serial_port_queues_behind_previous_request() {
    let mut mem = FlatMemory::simple(&flat_config(4, 1, Some(4))).unwrap();
    let a = mem.register_client("a").unwrap();
    let b = mem.register_client("b").unwrap();
    let mut clients = vec![RecordingClient::default(), RecordingClient::default()];

    assert!(mem.read(a, MemAddr(0), 8).unwrap().is_delayed());
    assert!(mem.read(b, MemAddr(64), 8).unwrap().is_delayed());
    step(&mut mem, &mut clients, 0, 30);

    assert_eq!(clients[0].reads[0].0, 5);
    assert_eq!(clients[1].reads[0].0, 10);
}

#[test]
fn parallel_ports_overlap() {
    let mut mem = FlatMemory::parallel(&flat_config(4, 1, Some(4))).unwrap();
    let a = mem.register_client("a").unwrap();
    let b = mem.register_client("b").unwrap();
    let mut clients = vec![RecordingClient::default(), RecordingClient::default()];

    assert!(mem.read(a, MemAddr(0), 8).unwrap().is_delayed());
    assert!(mem.read(b, MemAddr(64), 8).unwrap().is_delayed());
    step(&mut mem, &mut clients, 0, 30);

    assert_eq!(clients[0].reads[0].0, 5);
    assert_eq!(clients[1].reads[0].0, 5);
}

// ══════════════════════════════════════════════════════════
// 2. Exactly-once delivery
// ══════════════════════════════════════════════════════════

#[test]
fn refused_completion_is_offered_again() {
    let mut mem = FlatMemory::simple(&flat_config(3, 1, Some(4))).unwrap();
    let c = mem.register_client("c").unwrap();
    let mut clients = vec![RecordingClient {
        refuse: 2,
        ..RecordingClient::default()
    }];

    assert!(mem.read(c, MemAddr(8), 4).unwrap().is_delayed());
    step(&mut mem, &mut clients, 0, 40);

    assert_eq!(clients[0].reads.len(), 1);
    assert_eq!(clients[0].reads[0].0, 6);
    assert_eq!(mem.stats().callback_retries, 2);
    assert!(mem.is_idle());
}

#[test]
fn write_lands_once_and_is_acknowledged() {
    let mut mem = FlatMemory::banked(&flat_config(2, 1, Some(4))).unwrap();
    let c = mem.register_client("c").unwrap();
    let mut clients = vec![RecordingClient::default()];

    let res = mem
        .write(c, MemAddr(0x80), Payload::from_slice(&[1, 2, 3]), WriteTag(7), &mut clients)
        .unwrap();
    assert!(res.is_delayed());
    assert_eq!(mem.peek(MemAddr(0x80), 3).unwrap(), vec![0, 0, 0]);
    step(&mut mem, &mut clients, 0, 20);

    assert_eq!(clients[0].writes, vec![(3, WriteTag(7))]);
    assert_eq!(mem.peek(MemAddr(0x80), 3).unwrap(), vec![1, 2, 3]);
    assert_eq!(clients[0].snoops, vec![(MemAddr(0x80), vec![1, 2, 3])]);
}

#[test]
fn read_after_write_sees_the_write() {
    let mut mem = FlatMemory::banked(&flat_config(2, 1, Some(4))).unwrap();
    let c = mem.register_client("c").unwrap();
    let mut clients = vec![RecordingClient::default()];

    let _ = mem
        .write(c, MemAddr(0x48), Payload::from_slice(&[9; 8]), WriteTag(0), &mut clients)
        .unwrap();
    assert!(mem.read(c, MemAddr(0x40), 64).unwrap().is_delayed());
    step(&mut mem, &mut clients, 0, 20);

    let data = &clients[0].reads[0].2;
    assert_eq!(&data[8..16], &[9; 8]);
}

// ══════════════════════════════════════════════════════════
// 3. Backpressure
// ══════════════════════════════════════════════════════════

#[test]
fn full_buffer_rejects_without_side_effect() {
    let mut mem = FlatMemory::simple(&flat_config(4, 1, Some(2))).unwrap();
    let c = mem.register_client("c").unwrap();
    let mut clients = vec![RecordingClient::default()];

    assert!(mem.read(c, MemAddr(0), 8).unwrap().is_delayed());
    assert!(mem.read(c, MemAddr(8), 8).unwrap().is_delayed());
    assert_eq!(mem.read(c, MemAddr(16), 8).unwrap(), MemResult::Failed);
    let res = mem
        .write(c, MemAddr(16), Payload::from_slice(&[1]), WriteTag(0), &mut clients)
        .unwrap();
    assert_eq!(res, MemResult::Failed);
    assert!(clients[0].snoops.is_empty());
    assert_eq!(mem.stats().rejected, 2);
    assert_eq!(mem.stats().reads, 2);

    step(&mut mem, &mut clients, 0, 6);
    assert!(mem.read(c, MemAddr(16), 8).unwrap().is_delayed());
}

#[test]
fn unbounded_buffer_never_rejects() {
    let mut mem = FlatMemory::simple(&flat_config(4, 1, None)).unwrap();
    let c = mem.register_client("c").unwrap();
    for i in 0..1000 {
        assert!(mem.read(c, MemAddr(i * 8 % 4096), 8).unwrap().is_delayed());
    }
}

// ══════════════════════════════════════════════════════════
// 4. Snoop veto
// ══════════════════════════════════════════════════════════

#[test]
fn snoop_veto_fails_write_with_no_side_effect() {
    let mut mem = FlatMemory::simple(&flat_config(2, 1, Some(4))).unwrap();
    let writer = mem.register_client("writer").unwrap();
    let _ = mem.register_client("vetoer").unwrap();

    let mut quiet = MockClient::new();
    let _ = quiet.expect_accepts_snoop().return_const(true);
    let _ = quiet.expect_on_snooped().never();
    let _ = quiet.expect_on_write_completed().never();
    let mut vetoer = MockClient::new();
    let _ = vetoer
        .expect_accepts_snoop()
        .withf(|addr, len| *addr == MemAddr(0x10) && *len == 2)
        .times(1)
        .return_const(false);
    let _ = vetoer.expect_on_snooped().never();
    let mut clients = vec![quiet, vetoer];

    let res = mem
        .write(writer, MemAddr(0x10), Payload::from_slice(&[5, 5]), WriteTag(1), &mut clients)
        .unwrap();
    assert_eq!(res, MemResult::Failed);
    assert!(mem.is_idle());
    assert_eq!(mem.stats().snoop_vetoes, 1);
    assert_eq!(mem.stats().writes, 0);
    for now in 0..10 {
        let _ = mem.cycle(now, &mut clients).unwrap();
    }
    assert_eq!(mem.peek(MemAddr(0x10), 2).unwrap(), vec![0, 0]);
}

#[test]
fn late_veto_leaves_earlier_snoopers_untouched() {
    let mut mem = FlatMemory::simple(&flat_config(2, 1, Some(4))).unwrap();
    let ids: Vec<_> = (0..3)
        .map(|i| mem.register_client(&format!("c{i}")).unwrap())
        .collect();
    let mut clients: Vec<RecordingClient> = (0..3).map(|_| RecordingClient::default()).collect();
    clients[2].veto = true;

    let res = mem
        .write(ids[0], MemAddr(0x20), Payload::from_slice(&[3, 4]), WriteTag(2), &mut clients)
        .unwrap();
    assert_eq!(res, MemResult::Failed);
    assert!(clients.iter().all(|c| c.snoops.is_empty()));

    clients[2].veto = false;
    let res = mem
        .write(ids[0], MemAddr(0x20), Payload::from_slice(&[3, 4]), WriteTag(2), &mut clients)
        .unwrap();
    assert!(res.is_delayed());
    for c in &clients {
        assert_eq!(c.snoops, vec![(MemAddr(0x20), vec![3, 4])]);
    }
}

#[test]
fn out_of_range_request_is_an_error() {
    let mut mem = FlatMemory::simple(&flat_config(2, 1, Some(4))).unwrap();
    let c = mem.register_client("c").unwrap();
    assert!(mem.read(c, MemAddr(64 * 1024 - 4), 8).is_err());
    assert!(mem.read(c, MemAddr(0), 65).is_err());
    assert!(mem.read(ClientId(4), MemAddr(0), 8).is_err());
}
