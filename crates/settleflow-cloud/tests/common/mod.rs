use settleflow_cloud::{AllocatorConfig, OptimisticAllocator};
use settleflow_cloud::testing::FakeRemote;
use std::sync::Arc;
use std::time::Duration;

/// Install a test-writer subscriber once; `RUST_LOG=debug` shows poll traces
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Allocator with its own jitter seed so competitors desynchronize reproducibly
#[allow(dead_code)]
pub fn allocator(
    remote: &Arc<FakeRemote>,
    max_attempts: u32,
    seed: u64,
) -> OptimisticAllocator<FakeRemote> {
    let config = AllocatorConfig::default()
        .with_max_attempts(max_attempts)
        .with_jitter(Duration::from_secs(1), Duration::from_secs(5))
        .with_seed(seed);
    OptimisticAllocator::new(remote.clone(), config)
}
