use half::f16;
use quickreduce::Profile;
use quickreduce::codec::{GROUP_SIZE, error_bound};

use super::helpers::{bits, rank_data, run_collective, test_config};

fn amax(values: impl IntoIterator<Item = f32>) -> f32 {
    values.into_iter().fold(0.0f32, |m, v| m.max(v.abs()))
}

#[tokio::test]
async fn test_opposite_values_cancel_for_every_profile() {
    for profile in Profile::ALL {
        let results = run_collective(2, test_config(), move |comm| {
            let v = if comm.rank() == 0 { 2.0 } else { -2.0 };
            comm.allreduce(profile, &vec![f16::from_f32(v); 1024]).unwrap()
        })
        .await;

        for (rank, out) in results.iter().enumerate() {
            assert!(
                out.iter().all(|v| v.to_f32() == 0.0),
                "{profile} rank {rank}: expected zeros"
            );
        }
    }
}

#[tokio::test]
async fn test_all_zero_input_stays_zero() {
    for profile in Profile::ALL {
        let results = run_collective(3, test_config(), move |comm| {
            comm.allreduce(profile, &vec![f16::ZERO; 512]).unwrap()
        })
        .await;

        for out in &results {
            assert!(out.iter().all(|v| v.to_f32() == 0.0 && !v.is_nan()));
        }
    }
}

#[tokio::test]
async fn test_lossy_profiles_within_bound_and_identical() {
    const WORLD: u32 = 4;
    const COUNT: usize = 2048;
    const SCALE: f32 = 5.0;

    for profile in &Profile::ALL[1..] {
        let profile = *profile;
        let results = run_collective(WORLD, test_config(), move |comm| {
            comm.allreduce(profile, &rank_data(comm.rank(), COUNT, SCALE))
                .unwrap()
        })
        .await;

        let inputs: Vec<Vec<f32>> = (0..WORLD)
            .map(|r| rank_data(r, COUNT, SCALE).iter().map(|v| v.to_f32()).collect())
            .collect();

        for g in 0..COUNT / GROUP_SIZE {
            let span = g * GROUP_SIZE..(g + 1) * GROUP_SIZE;
            let exact: Vec<f32> = span
                .clone()
                .map(|i| inputs.iter().map(|x| x[i]).sum())
                .collect();
            // One quantization per contribution, one for the reduced slice,
            // and the final fp16 rounding.
            let input_err: f32 = inputs
                .iter()
                .map(|x| {
                    let m = amax(x[span.clone()].iter().copied());
                    error_bound(profile, m, m)
                })
                .sum();
            let sum_amax = amax(exact.iter().copied()) + input_err;
            let tol = input_err + error_bound(profile, sum_amax, sum_amax) + sum_amax / 1024.0;

            for (j, i) in span.enumerate() {
                let got = results[0][i].to_f32();
                assert!(
                    (got - exact[j]).abs() <= tol,
                    "{profile} index {i}: got {got}, exact {}, tol {tol}",
                    exact[j]
                );
            }
        }

        for (rank, out) in results.iter().enumerate().skip(1) {
            assert_eq!(bits(out), bits(&results[0]), "{profile} rank {rank} differs");
        }
    }
}

#[tokio::test]
async fn test_lower_precision_costs_more_error() {
    let mut errors = Vec::new();
    for profile in [Profile::Q8, Profile::Q6, Profile::Q4] {
        let results = run_collective(2, test_config(), move |comm| {
            comm.allreduce(profile, &rank_data(comm.rank(), 1024, 1.0))
                .unwrap()
        })
        .await;
        let exact: Vec<f32> = (0..1024)
            .map(|i| (0..2).map(|r| rank_data(r, 1024, 1.0)[i].to_f32()).sum())
            .collect();
        let mean_err: f32 = results[0]
            .iter()
            .zip(&exact)
            .map(|(a, b)| (a.to_f32() - b).abs())
            .sum::<f32>()
            / 1024.0;
        errors.push(mean_err);
    }
    assert!(errors[0] < errors[1] && errors[1] < errors[2], "{errors:?}");
}
