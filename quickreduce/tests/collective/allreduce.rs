use half::f16;
use quickreduce::Profile;
use std::sync::Arc;

use super::helpers::{adapter, bits, exact_sum, rank_data, run_collective, test_config};

#[tokio::test]
async fn test_allreduce_4_ranks_ones() {
    let results = run_collective(4, test_config(), |comm| {
        let input = vec![f16::ONE; 1024];
        comm.allreduce(Profile::FullPrecision, &input).unwrap()
    })
    .await;

    for (rank, out) in results.iter().enumerate() {
        assert_eq!(out.len(), 1024);
        assert!(
            out.iter().all(|v| *v == f16::from_f32(4.0)),
            "rank {rank} allreduce failed"
        );
    }
}

#[tokio::test]
async fn test_allreduce_bit_exact_for_world_1_to_5() {
    for world in 1..=5u32 {
        // 1000 is not a multiple of the rank count or the group size.
        let results = run_collective(world, test_config(), |comm| {
            let input = rank_data(comm.rank(), 1000, 3.0);
            comm.allreduce(Profile::FullPrecision, &input).unwrap()
        })
        .await;

        let expected = bits(&exact_sum(world, 1000, 3.0));
        for (rank, out) in results.iter().enumerate() {
            assert_eq!(bits(out), expected, "world {world} rank {rank} differs");
        }
    }
}

#[tokio::test]
async fn test_allreduce_inplace_by_id() {
    let results = run_collective(3, test_config(), |comm| {
        let mut data = vec![f16::from_f32((comm.rank() + 1) as f32); 96];
        comm.allreduce_by_id(1, &mut data).unwrap();
        data
    })
    .await;

    for out in &results {
        assert!(out.iter().all(|v| *v == f16::from_f32(6.0)));
    }
}

#[tokio::test]
async fn test_allreduce_repeated_calls() {
    let results = run_collective(3, test_config(), |comm| {
        let mut outputs = Vec::new();
        for iter in 0..20u32 {
            let val = f16::from_f32((comm.rank() * 10 + iter) as f32);
            let profile = Profile::ALL[iter as usize % Profile::ALL.len()];
            outputs.push(comm.allreduce(profile, &vec![val; 256]).unwrap());
        }
        outputs
    })
    .await;

    for (rank, outputs) in results.iter().enumerate() {
        for (iter, out) in outputs.iter().enumerate() {
            // 0*10 + 1*10 + 2*10 + 3*iter
            let expected = (30 + 3 * iter) as f32;
            let profile = Profile::ALL[iter % Profile::ALL.len()];
            for v in out {
                let tol = if profile.is_lossy() { expected * 0.15 } else { 0.0 };
                assert!(
                    (v.to_f32() - expected).abs() <= tol,
                    "rank {rank} iter {iter} ({profile}): {v} vs {expected}"
                );
            }
        }
    }
    for outputs in &results[1..] {
        for (a, b) in outputs.iter().zip(&results[0]) {
            assert_eq!(bits(a), bits(b));
        }
    }
}

#[tokio::test]
async fn test_allreduce_fewer_groups_than_ranks() {
    // 64 elements = 2 groups of 32: ranks 2..5 own empty slices.
    let results = run_collective(5, test_config(), |comm| {
        let input = vec![f16::from_f32(1.5); 64];
        comm.allreduce(Profile::Q8, &input).unwrap()
    })
    .await;

    for out in &results {
        assert_eq!(out.len(), 64);
        for v in out {
            assert!((v.to_f32() - 7.5).abs() <= 7.5 / 127.0 * 5.0);
        }
    }
}

#[tokio::test]
async fn test_allreduce_full_capacity() {
    let results = run_collective(2, test_config(), |comm| {
        let input = vec![f16::from_f32(0.25); comm.capacity()];
        comm.allreduce(Profile::FullPrecision, &input).unwrap()
    })
    .await;

    for out in &results {
        assert_eq!(out.len(), 4096);
        assert!(out.iter().all(|v| *v == f16::from_f32(0.5)));
    }
}

#[tokio::test]
async fn test_allreduce_async() {
    let comms = quickreduce::QuickReduce::bootstrap_local(3, adapter(), test_config()).unwrap();
    let comms: Vec<Arc<_>> = comms.into_iter().map(Arc::new).collect();

    let mut handles = Vec::new();
    for comm in &comms {
        let comm = Arc::clone(comm);
        handles.push(tokio::spawn(async move {
            let data = vec![f16::from_f32(comm.rank() as f32); 128];
            comm.allreduce_async(Profile::FullPrecision, data).await
        }));
    }
    for h in handles {
        let out = h.await.unwrap().unwrap();
        assert!(out.iter().all(|v| *v == f16::from_f32(3.0)));
    }
}
