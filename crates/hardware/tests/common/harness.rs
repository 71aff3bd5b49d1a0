use mgsim_core::config::{Config, MemoryConfig, MemoryKind, WorkloadKind};
use mgsim_core::kernel::Cycle;
use mgsim_core::memory::{ClientSet, Memory};

/// Installs a test-friendly tracing subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Memory timing used by the flat backend tests.
pub fn flat_config(base: u64, per_line: u64, buffer: Option<usize>) -> MemoryConfig {
    MemoryConfig {
        size: 64 * 1024,
        line_size: 64,
        base_latency: base,
        line_latency: per_line,
        buffer_size: buffer,
        ..MemoryConfig::default()
    }
}

/// A small grid: 2 cores of 2 threads, 64 KiB of fast memory.
pub fn grid_config(kind: MemoryKind, workload: WorkloadKind, ops: usize) -> Config {
    let mut config = Config::default();
    config.memory.kind = kind;
    config.memory.size = 64 * 1024;
    config.memory.base_latency = 6;
    config.memory.line_latency = 1;
    config.coma.caches_per_ring = 2;
    config.coma.rings = 2;
    config.coma.sets = 4;
    config.coma.associativity = 2;
    config.core.cores = 2;
    config.core.threads_per_core = 2;
    config.core.regs_per_thread = 4;
    config.workload.kind = workload;
    config.workload.ops_per_thread = ops;
    config.general.deadlock_threshold = 500;
    config
}

/// Cycles `memory` from `from` until it is idle or `limit` cycles pass.
///
/// Returns the first cycle at which the backend was idle.
pub fn run_memory(
    memory: &mut dyn Memory,
    clients: &mut dyn ClientSet,
    from: Cycle,
    limit: u64,
) -> Option<Cycle> {
    for now in from..from + limit {
        let _ = memory.cycle(now, clients).ok()?;
        if memory.is_idle() {
            return Some(now);
        }
    }
    None
}
