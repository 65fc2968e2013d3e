mod allreduce;
mod helpers;

pub(crate) use allreduce::two_shot_allreduce;
