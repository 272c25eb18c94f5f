//! End-to-end training properties: the analytic gradients drive the loss
//! down, and they agree with numeric differentiation of the whole network.

use touchstone::layout::num_parameters;
use touchstone::{AdamW, Gpt2, Gpt2Config};

fn fixed_batch(config: &Gpt2Config, b: usize, t: usize) -> (Vec<u32>, Vec<u32>) {
    let v = config.vocab_size;
    let inputs: Vec<u32> = (0..b * t).map(|i| ((i * 13 + 5) % v) as u32).collect();
    let targets: Vec<u32> = (0..b * t).map(|i| ((i * 13 + 6) % v) as u32).collect();
    (inputs, targets)
}

#[test]
fn repeated_updates_on_one_batch_reduce_its_loss() {
    let config = Gpt2Config::tiny();
    let mut model = Gpt2::random(config.clone(), 42).unwrap();
    let (inputs, targets) = fixed_batch(&config, 2, 8);
    let mut optimizer = AdamW::default_config();

    let mut first = None;
    let mut last = 0.0;
    for _ in 0..30 {
        model.forward(&inputs, Some(&targets), 2, 8).unwrap();
        last = model.mean_loss().unwrap();
        first.get_or_insert(last);
        model.zero_grad();
        model.backward().unwrap();
        optimizer.update(&mut model, 1e-3).unwrap();
    }
    let first = first.unwrap();
    assert!(
        last < first - 0.01,
        "loss did not decrease: {} -> {}",
        first,
        last
    );
}

#[test]
fn analytic_gradients_match_central_differences() {
    let config = Gpt2Config::tiny();
    let mut model = Gpt2::random(config.clone(), 21).unwrap();
    let (inputs, targets) = fixed_batch(&config, 2, 4);

    model.forward(&inputs, Some(&targets), 2, 4).unwrap();
    model.zero_grad();
    model.backward().unwrap();
    let grads: Vec<f32> = model.grads().unwrap().to_vec();

    // probe indices spread across the whole flat buffer, so every tensor
    // family (embeddings, projections, layernorms, biases) gets hit
    let n = num_parameters(&config);
    let probes: Vec<usize> = (0..16).map(|i| (i * n) / 16 + 1).collect();

    let h = 1e-2f32;
    for &idx in &probes {
        let loss_at = |model: &mut Gpt2, delta: f32| -> f32 {
            {
                let (params, _) = model.params_and_grads_mut().unwrap();
                params[idx] += delta;
            }
            model.forward(&inputs, Some(&targets), 2, 4).unwrap();
            let loss = model.mean_loss().unwrap();
            let (params, _) = model.params_and_grads_mut().unwrap();
            params[idx] -= delta;
            loss
        };
        let plus = loss_at(&mut model, h);
        let minus = loss_at(&mut model, -h);
        let numeric = (plus - minus) / (2.0 * h);
        let analytic = grads[idx];
        let tol = 1e-3 + 0.05 * numeric.abs().max(analytic.abs());
        assert!(
            (numeric - analytic).abs() < tol,
            "param {}: analytic {} vs numeric {}",
            idx,
            analytic,
            numeric
        );
    }
}

#[test]
fn training_is_reproducible_across_runs() {
    let config = Gpt2Config::tiny();
    let (inputs, targets) = fixed_batch(&config, 2, 4);

    let run = || -> Vec<u32> {
        let mut model = Gpt2::random(config.clone(), 7).unwrap();
        let mut optimizer = AdamW::default_config();
        for _ in 0..3 {
            model.forward(&inputs, Some(&targets), 2, 4).unwrap();
            model.zero_grad();
            model.backward().unwrap();
            optimizer.update(&mut model, 1e-3).unwrap();
        }
        model.params().iter().map(|p| p.to_bits()).collect()
    };
    assert_eq!(run(), run());
}
