use mgsim_core::common::{MemAddr, WriteTag};
use mgsim_core::kernel::Cycle;
use mgsim_core::memory::MemoryClient;

mockall::mock! {
    /// `mockall` double of a memory client.
    pub Client {}

    impl MemoryClient for Client {
        fn on_read_completed(&mut self, addr: MemAddr, data: &[u8]) -> bool;
        fn on_write_completed(&mut self, tag: WriteTag) -> bool;
        fn accepts_snoop(&self, addr: MemAddr, len: usize) -> bool;
        fn on_snooped(&mut self, addr: MemAddr, data: &[u8]);
    }
}

/// A memory client that records every callback with the cycle it arrived in.
#[derive(Debug, Default)]
pub struct RecordingClient {
    /// Cycle stamped on callbacks; set by the test loop.
    pub now: Cycle,
    /// `(cycle, addr, data)` per read completion.
    pub reads: Vec<(Cycle, MemAddr, Vec<u8>)>,
    /// `(cycle, tag)` per write completion.
    pub writes: Vec<(Cycle, WriteTag)>,
    /// `(addr, data)` per snooped write that went ahead.
    pub snoops: Vec<(MemAddr, Vec<u8>)>,
    /// Refuse snoops.
    pub veto: bool,
    /// Refuse the next this-many completions.
    pub refuse: usize,
}

impl RecordingClient {
    fn refused(&mut self) -> bool {
        if self.refuse > 0 {
            self.refuse -= 1;
            true
        } else {
            false
        }
    }
}

impl MemoryClient for RecordingClient {
    fn on_read_completed(&mut self, addr: MemAddr, data: &[u8]) -> bool {
        if self.refused() {
            return false;
        }
        self.reads.push((self.now, addr, data.to_vec()));
        true
    }

    fn on_write_completed(&mut self, tag: WriteTag) -> bool {
        if self.refused() {
            return false;
        }
        self.writes.push((self.now, tag));
        true
    }

    fn accepts_snoop(&self, _addr: MemAddr, _len: usize) -> bool {
        !self.veto
    }

    fn on_snooped(&mut self, addr: MemAddr, data: &[u8]) {
        self.snoops.push((addr, data.to_vec()));
    }
}
