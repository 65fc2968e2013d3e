use half::f16;
use quickreduce::{QuickReduce, QuickReduceConfig, ShmAdapter};
use std::sync::Arc;
use std::time::Duration;

/// Config used by most tests: small staging buffers, generous timeout.
pub fn test_config() -> QuickReduceConfig {
    QuickReduceConfig::default()
        .with_max_elements(4096)
        .with_peer_timeout(Duration::from_secs(10))
}

pub fn adapter() -> Arc<ShmAdapter> {
    Arc::new(ShmAdapter::with_dir(std::env::temp_dir()))
}

/// Helper: run a blocking collective on N in-process participants
/// concurrently, one blocking task per rank. Returns each rank's result in
/// rank order. Keeps all contexts alive until every task completes.
pub async fn run_collective<F, T>(world_size: u32, config: QuickReduceConfig, f: F) -> Vec<T>
where
    F: Fn(Arc<QuickReduce>) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let comms = QuickReduce::bootstrap_local(world_size, adapter(), config).unwrap();
    let comms: Vec<Arc<QuickReduce>> = comms.into_iter().map(Arc::new).collect();

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for c in &comms {
        let c = Arc::clone(c);
        let f = Arc::clone(&f);
        handles.push(tokio::task::spawn_blocking(move || f(c)));
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    results
}

/// Deterministic per-rank test data in roughly `[-scale, scale]`.
pub fn rank_data(rank: u32, count: usize, scale: f32) -> Vec<f16> {
    (0..count)
        .map(|i| {
            let x = (i as f32 * 0.173 + rank as f32 * 1.37).sin() * scale;
            f16::from_f32(x)
        })
        .collect()
}

/// `f16(sum of f32(x_p))` in ascending rank order.
pub fn exact_sum(world_size: u32, count: usize, scale: f32) -> Vec<f16> {
    let mut acc = vec![0.0f32; count];
    for rank in 0..world_size {
        for (a, x) in acc.iter_mut().zip(rank_data(rank, count, scale)) {
            *a += x.to_f32();
        }
    }
    acc.into_iter().map(f16::from_f32).collect()
}

pub fn bits(values: &[f16]) -> Vec<u16> {
    values.iter().map(|v| v.to_bits()).collect()
}
