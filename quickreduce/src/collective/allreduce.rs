use half::f16;

use crate::codec;
use crate::collective::helpers::ChunkLayout;
use crate::error::{QuickReduceError, Result};
use crate::memory::staging::StagingBuffer;
use crate::sync::{SpinWait, Stage, raise};
use crate::topology::Topology;
use crate::types::{Profile, Rank};

/// Two-shot allreduce through peer staging buffers: in-place sum of `buf`
/// across every participant of `topo`.
///
/// Algorithm for call `epoch` (each participant runs it independently):
/// 1. Encode `buf` into the own stage area, publish the call shape, raise
///    `input_ready = epoch`.
/// 2. Reduce-scatter: for the owned slice (split in whole codec groups, earlier
///    ranks take the remainder), read every rank's encoded contribution in
///    ascending rank order and accumulate in `f32`.
/// 3. Re-encode the owned sum into the own result area, raise
///    `slice_ready = epoch`.
/// 4. Allgather: decode every owner's result slice (own included) into `buf`.
///    Decoding the own re-encoded slice keeps results bit-identical on every
///    rank.
/// 5. Barrier: write `consumed[self] = epoch` into every peer's buffer, wait
///    for every peer's acknowledgement in the own buffer, reset the own flags.
///
/// After step 5 no peer reads this participant's buffer until the next call's
/// `input_ready`, so the stage area is free to overwrite.
///
/// The caller validates `buf` (block size, capacity) and guarantees `epoch`
/// is strictly greater than any epoch previously used on this topology.
pub(crate) fn two_shot_allreduce(
    topo: &Topology,
    wait: &SpinWait,
    profile: Profile,
    buf: &mut [f16],
    epoch: u64,
) -> Result<()> {
    let count = buf.len();
    if count == 0 {
        return Ok(());
    }

    let world = topo.world_size();
    let rank = topo.rank();
    let group = profile.group_size();
    let group_bytes = profile.group_bytes();
    let chunks = ChunkLayout::new(count / group, world as usize);
    let local = topo.local();

    tracing::trace!(rank, epoch, count, %profile, "allreduce start");

    // SAFETY: the previous call's barrier guarantees no peer is reading the
    // stage area, and peers do not read it before `input_ready` below.
    let staged = unsafe { local.stage_mut(0, count / group * group_bytes) };
    codec::encode_into(profile, buf, staged)?;
    local.publish_call(count, profile);
    raise(local.input_ready(), epoch);

    // Reduce-scatter the owned slice.
    let owned = chunks.range(rank as usize);
    let owned_bytes = owned.start * group_bytes..owned.end * group_bytes;
    let mut acc = vec![0.0f32; chunks.chunk_count(rank as usize) * group];
    for peer in 0..world {
        let theirs = topo.buffer(peer);
        wait.wait_for(theirs.input_ready(), epoch, peer, Stage::Input)?;
        check_call_shape(theirs, peer, count, profile)?;
        if acc.is_empty() {
            continue;
        }
        // SAFETY: `input_ready` observed with acquire; the owner does not
        // rewrite its stage area until after this call's barrier.
        let encoded = unsafe { theirs.stage(owned_bytes.start, owned_bytes.len()) };
        codec::decode_accumulate(profile, encoded, &mut acc)?;
    }

    // SAFETY: only this participant writes its result area, and peers read it
    // only after `slice_ready` below.
    let result = unsafe { local.result_mut(owned_bytes.start, owned_bytes.len()) };
    codec::encode_into(profile, &acc, result)?;
    raise(local.slice_ready(), epoch);

    // Allgather every owner's reduced slice.
    for owner in 0..world {
        let theirs = topo.buffer(owner);
        wait.wait_for(theirs.slice_ready(), epoch, owner, Stage::Slice)?;
        let groups = chunks.range(owner as usize);
        if groups.is_empty() {
            continue;
        }
        // SAFETY: `slice_ready` observed with acquire; stable until the barrier.
        let encoded = unsafe {
            theirs.result(groups.start * group_bytes, groups.len() * group_bytes)
        };
        codec::decode_into(
            profile,
            encoded,
            &mut buf[groups.start * group..groups.end * group],
        )?;
    }

    // Barrier: everyone is done reading everyone's buffers for this epoch.
    for peer in 0..world {
        raise(topo.buffer(peer).consumed(rank), epoch);
    }
    for peer in 0..world {
        wait.wait_for(local.consumed(peer), epoch, peer, Stage::Consumed)?;
    }
    local.reset_flags(world);

    tracing::trace!(rank, epoch, "allreduce done");
    Ok(())
}

/// Fail with `CollectiveMismatch` unless `peer` published the same call shape.
fn check_call_shape(
    theirs: &StagingBuffer,
    peer: Rank,
    count: usize,
    profile: Profile,
) -> Result<()> {
    let (their_count, their_profile) = theirs.call_header();
    if their_count != count as u64 {
        return Err(QuickReduceError::CollectiveMismatch {
            rank: peer,
            reason: format!("{their_count} elements, expected {count}"),
        });
    }
    if their_profile != profile.id() as u64 {
        return Err(QuickReduceError::CollectiveMismatch {
            rank: peer,
            reason: format!("profile id {their_profile}, expected {}", profile.id()),
        });
    }
    Ok(())
}
