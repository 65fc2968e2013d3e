use half::f16;
use quickreduce::{
    PeerHandle, PeerRegistry, Profile, QuickReduce, QuickReduceConfig, QuickReduceError,
};
use std::sync::Arc;
use std::time::Duration;

use super::helpers::{adapter, run_collective, test_config};

fn init_world(world_size: u32, config: QuickReduceConfig) -> Vec<QuickReduce> {
    (0..world_size)
        .map(|rank| QuickReduce::init_with(world_size, rank, adapter(), config.clone()).unwrap())
        .collect()
}

#[test]
fn test_allreduce_before_handles_is_not_ready() {
    let comm = QuickReduce::init_with(2, 0, adapter(), test_config()).unwrap();
    let err = comm
        .allreduce(Profile::FullPrecision, &[f16::ONE; 8])
        .unwrap_err();
    assert!(matches!(err, QuickReduceError::ContextNotReady));
    assert!(!comm.is_ready());
}

#[test]
fn test_incomplete_handle_set() {
    let mut comms = init_world(2, test_config());
    let only_one = vec![comms[0].get_comm_handle()];
    assert!(matches!(
        comms[0].set_comm_handles(&only_one),
        Err(QuickReduceError::IncompleteHandleSet {
            expected: 2,
            actual: 1
        })
    ));
    // A short set is input validation: the full set is still accepted.
    let all: Vec<PeerHandle> = comms.iter().map(|c| c.get_comm_handle()).collect();
    comms[0].set_comm_handles(&all).unwrap();
    assert!(comms[0].is_ready());
}

#[test]
fn test_set_handles_twice_is_already_initialized() {
    let mut comms = QuickReduce::bootstrap_local(1, adapter(), test_config()).unwrap();
    let handles = vec![comms[0].get_comm_handle()];
    assert!(matches!(
        comms[0].set_comm_handles(&handles),
        Err(QuickReduceError::AlreadyInitialized)
    ));
}

#[test]
fn test_handles_survive_byte_transport() {
    let mut comms = init_world(3, test_config());
    let handle_before = comms[1].get_comm_handle();

    let wire: Vec<Vec<u8>> = comms
        .iter()
        .map(|c| c.get_comm_handle().to_bytes().unwrap())
        .collect();
    let handles: Vec<PeerHandle> = wire
        .iter()
        .map(|b| PeerHandle::from_bytes(b).unwrap())
        .collect();
    for comm in &mut comms {
        comm.set_comm_handles(&handles).unwrap();
    }

    assert_eq!(comms[1].get_comm_handle(), handle_before);
    assert!(comms.iter().all(|c| c.is_ready()));
}

#[test]
fn test_unknown_rank() {
    let mut registry = PeerRegistry::new(4, 0, adapter());
    let handle = PeerHandle::new(5, 1024, 1, "unused");
    assert!(matches!(
        registry.import_peer_handle(5, handle),
        Err(QuickReduceError::UnknownRank {
            rank: 5,
            world_size: 4
        })
    ));
}

#[test]
fn test_max_elements_mismatch_rejected() {
    let a = QuickReduce::init_with(2, 0, adapter(), test_config()).unwrap();
    let mut b =
        QuickReduce::init_with(2, 1, adapter(), test_config().with_max_elements(1024)).unwrap();
    let handles = vec![a.get_comm_handle(), b.get_comm_handle()];
    assert!(matches!(
        b.set_comm_handles(&handles),
        Err(QuickReduceError::HandleMismatch { rank: 0, .. })
    ));
}

#[test]
fn test_invalid_block_size_off_by_one() {
    let comms = QuickReduce::bootstrap_local(1, adapter(), test_config()).unwrap();
    let comm = &comms[0];
    for profile in &Profile::ALL[1..] {
        for len in [31usize, 33, 1023, 1025] {
            let err = comm
                .allreduce(*profile, &vec![f16::ONE; len])
                .unwrap_err();
            assert!(
                matches!(
                    err,
                    QuickReduceError::InvalidBlockSize { len: l, granularity: 32, .. } if l == len
                ),
                "{profile} with {len} elements: {err}"
            );
        }
        // No side effects: a well-shaped call right after succeeds.
        let out = comm.allreduce(*profile, &vec![f16::ONE; 1024]).unwrap();
        assert!(out.iter().all(|v| *v == f16::ONE));
    }
    // Full precision has no group constraint.
    comm.allreduce(Profile::FullPrecision, &vec![f16::ONE; 1023])
        .unwrap();
}

#[test]
fn test_unsupported_profile_id() {
    let comms = QuickReduce::bootstrap_local(1, adapter(), test_config()).unwrap();
    let mut buf = vec![f16::ONE; 32];
    for id in [0u8, 6, 255] {
        assert!(matches!(
            comms[0].allreduce_by_id(id, &mut buf),
            Err(QuickReduceError::UnsupportedProfile(x)) if x == id
        ));
    }
}

#[test]
fn test_peer_timeout_poisons_context() {
    let config = test_config().with_peer_timeout(Duration::from_millis(200));
    let comms = QuickReduce::bootstrap_local(2, adapter(), config).unwrap();

    // Rank 1 never joins.
    let err = comms[0]
        .allreduce(Profile::Q8, &vec![f16::ONE; 64])
        .unwrap_err();
    assert!(
        matches!(
            err,
            QuickReduceError::PeerTimeout {
                rank: 1,
                stage: "input_ready",
                timeout_ms: 200
            }
        ),
        "{err}"
    );
    assert!(comms[0].is_poisoned());

    let err = comms[0]
        .allreduce(Profile::Q8, &vec![f16::ONE; 64])
        .unwrap_err();
    assert!(matches!(err, QuickReduceError::ContextPoisoned));
    assert!(!comms[1].is_poisoned());
}

#[tokio::test]
async fn test_mismatched_calls_are_detected() {
    let config = test_config().with_peer_timeout(Duration::from_secs(2));
    let results = run_collective(2, config, |comm| {
        let count = if comm.rank() == 0 { 64 } else { 32 };
        let first = comm.allreduce(Profile::FullPrecision, &vec![f16::ONE; count]);
        let second = comm.allreduce(Profile::FullPrecision, &vec![f16::ONE; count]);
        (first, second)
    })
    .await;

    for (rank, (first, second)) in results.iter().enumerate() {
        let peer = 1 - rank as u32;
        assert!(
            matches!(first, Err(QuickReduceError::CollectiveMismatch { rank: r, .. }) if *r == peer),
            "rank {rank}: {first:?}"
        );
        assert!(matches!(second, Err(QuickReduceError::ContextPoisoned)));
    }
}

#[test]
fn test_concurrent_call_rejected() {
    let comms = QuickReduce::bootstrap_local(2, adapter(), test_config()).unwrap();
    let comms: Vec<Arc<QuickReduce>> = comms.into_iter().map(Arc::new).collect();

    let rank0 = Arc::clone(&comms[0]);
    let first = std::thread::spawn(move || rank0.allreduce(Profile::FullPrecision, &[f16::ONE; 32]));

    // Rank 0's first call is now parked waiting for rank 1.
    std::thread::sleep(Duration::from_millis(100));
    let err = comms[0]
        .allreduce(Profile::FullPrecision, &[f16::ONE; 32])
        .unwrap_err();
    assert!(matches!(err, QuickReduceError::CallInProgress));

    let out1 = comms[1]
        .allreduce(Profile::FullPrecision, &[f16::ONE; 32])
        .unwrap();
    let out0 = first.join().unwrap().unwrap();
    assert_eq!(out0, out1);
    assert!(out0.iter().all(|v| *v == f16::from_f32(2.0)));
    assert!(!comms[0].is_poisoned());
}
