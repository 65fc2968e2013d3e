//! Quantized allreduce across 4 ranks.
//!
//! Each rank is an independent context. Handles are gathered as bytes and
//! handed back to every rank, the way a process launcher would. Every rank
//! then sums a tensor of ones with each profile.
//!
//! ```bash
//! cargo run --example allreduce
//! ```

use half::f16;
use quickreduce::{PeerHandle, Profile, QuickReduce, QuickReduceConfig, ShmAdapter};
use std::sync::Arc;

#[tokio::main]
async fn main() -> quickreduce::Result<()> {
    let world_size = 4u32;
    let adapter = Arc::new(ShmAdapter::from_env());
    let config = QuickReduceConfig::from_env().with_max_elements(1 << 16);

    let mut comms = Vec::new();
    for rank in 0..world_size {
        comms.push(QuickReduce::init_with(
            world_size,
            rank,
            adapter.clone(),
            config.clone(),
        )?);
    }

    // Share communication handles between the instances.
    let wire = comms
        .iter()
        .map(|c| c.get_comm_handle().to_bytes())
        .collect::<quickreduce::Result<Vec<_>>>()?;
    let handles = wire
        .iter()
        .map(|b| PeerHandle::from_bytes(b))
        .collect::<quickreduce::Result<Vec<_>>>()?;
    for comm in &mut comms {
        comm.set_comm_handles(&handles)?;
    }
    let comms: Vec<Arc<QuickReduce>> = comms.into_iter().map(Arc::new).collect();

    for profile in Profile::ALL {
        let mut tasks = Vec::new();
        for comm in &comms {
            let comm = Arc::clone(comm);
            tasks.push(tokio::spawn(async move {
                let tensor = vec![f16::ONE; 1024];
                let result = comm.allreduce_async(profile, tensor).await?;
                quickreduce::Result::Ok((comm.rank(), result))
            }));
        }

        for t in tasks {
            let (rank, result) = t.await.expect("allreduce task panicked")?;
            let expected = f16::from_f32(world_size as f32);
            assert!(result.iter().all(|v| *v == expected));
            println!("{profile}: rank {rank} got {:?} ..", &result[..4]);
        }
    }
    // Output (all ranks identical):
    // fp16: rank 0 got [4.0, 4.0, 4.0, 4.0] ..
    // ...

    Ok(())
}
