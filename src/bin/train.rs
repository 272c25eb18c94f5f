//! Training driver.
//!
//! Loads a checkpoint (or falls back to random initialization), then runs
//! a fixed number of AdamW steps over the training token stream, with
//! periodic validation loss measurements and periodic unconditional
//! sampling so progress is visible as text.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::time::Instant;
use touchstone::{
    sample_from_probs, AdamW, Gpt2, Gpt2Config, Result, TokenDataLoader, TouchstoneError,
    TrainingLogger,
};

struct Args {
    checkpoint: String,
    train_tokens: String,
    val_tokens: String,
    batch_size: usize,
    seq_len: usize,
    learning_rate: f32,
    num_steps: usize,
    csv: Option<String>,
    seed: u64,
}

impl Args {
    fn parse() -> Args {
        let mut args = Args {
            checkpoint: "gpt2_124M.bin".to_string(),
            train_tokens: "data/train.bin".to_string(),
            val_tokens: "data/val.bin".to_string(),
            batch_size: 4,
            seq_len: 64,
            learning_rate: 1e-4,
            num_steps: 40,
            csv: None,
            seed: 1337,
        };
        let mut it = std::env::args().skip(1);
        while let Some(flag) = it.next() {
            let mut value = |name: &str| {
                it.next().unwrap_or_else(|| {
                    eprintln!("missing value for {}", name);
                    std::process::exit(2);
                })
            };
            match flag.as_str() {
                "--checkpoint" => args.checkpoint = value("--checkpoint"),
                "--train" => args.train_tokens = value("--train"),
                "--val" => args.val_tokens = value("--val"),
                "--batch-size" => args.batch_size = parse_num(&value("--batch-size")),
                "--seq-len" => args.seq_len = parse_num(&value("--seq-len")),
                "--lr" => args.learning_rate = parse_num(&value("--lr")),
                "--steps" => args.num_steps = parse_num(&value("--steps")),
                "--csv" => args.csv = Some(value("--csv")),
                "--seed" => args.seed = parse_num(&value("--seed")),
                other => {
                    eprintln!("unknown flag: {}", other);
                    eprintln!(
                        "usage: train [--checkpoint F] [--train F] [--val F] \
                         [--batch-size N] [--seq-len N] [--lr X] [--steps N] \
                         [--csv F] [--seed N]"
                    );
                    std::process::exit(2);
                }
            }
        }
        args
    }
}

fn parse_num<T: std::str::FromStr>(s: &str) -> T {
    s.parse().unwrap_or_else(|_| {
        eprintln!("cannot parse number: {}", s);
        std::process::exit(2);
    })
}

/// Mean validation loss over up to `max_batches` batches.
fn validation_loss(
    model: &mut Gpt2,
    loader: &mut TokenDataLoader,
    b: usize,
    t: usize,
    max_batches: usize,
) -> Result<f32> {
    loader.reset();
    let batches = loader.num_batches().min(max_batches);
    let mut total = 0.0;
    for _ in 0..batches {
        let (inputs, targets) = loader.next_batch();
        let (inputs, targets) = (inputs.to_vec(), targets.to_vec());
        model.forward(&inputs, Some(&targets), b, t)?;
        total += model.mean_loss().unwrap_or(0.0);
    }
    Ok(total / batches as f32)
}

/// Sample `length` tokens unconditionally and print them as ids.
fn generate(model: &mut Gpt2, rng: &mut StdRng, length: usize) -> Result<()> {
    // conditioning on the end-of-text token, the last vocabulary id
    let eot = (model.config().vocab_size - 1) as u32;
    let mut tokens = vec![eot];
    for t in 1..length {
        model.forward(&tokens, None, 1, t)?;
        let probs = model.probs_row(0, t - 1).ok_or(TouchstoneError::Sequencing)?;
        let coin: f32 = rng.random();
        tokens.push(sample_from_probs(probs, coin) as u32);
    }
    println!("generated: {:?}", &tokens[1..]);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut model = if Path::new(&args.checkpoint).exists() {
        println!("loading checkpoint {}", args.checkpoint);
        Gpt2::from_checkpoint(&args.checkpoint)?
    } else {
        println!(
            "checkpoint {} not found, starting from random weights",
            args.checkpoint
        );
        Gpt2::random(Gpt2Config::gpt2_124m(), args.seed)?
    };
    println!(
        "config: {}",
        serde_json::to_string_pretty(model.config()).map_err(TouchstoneError::from)?
    );
    println!("parameters: {}", model.num_parameters());

    let (b, t) = (args.batch_size, args.seq_len);
    let mut train_loader = TokenDataLoader::new(&args.train_tokens, b, t)?;
    let mut val_loader = TokenDataLoader::new(&args.val_tokens, b, t)?;
    println!(
        "train: {} tokens, {} batches | val: {} tokens",
        train_loader.num_tokens(),
        train_loader.num_batches(),
        val_loader.num_tokens()
    );

    let mut optimizer = AdamW::default_config();
    let mut logger = match &args.csv {
        Some(path) => TrainingLogger::with_csv(path)?,
        None => TrainingLogger::new(),
    };
    let mut rng = StdRng::seed_from_u64(args.seed);

    for step in 0..=args.num_steps {
        let mut val = None;
        if step % 10 == 0 {
            let loss = validation_loss(&mut model, &mut val_loader, b, t, 10)?;
            logger.log_val(step, loss);
            val = Some(loss);
        }
        if step > 0 && step % 20 == 0 {
            generate(&mut model, &mut rng, 64)?;
        }
        if step == args.num_steps {
            break;
        }

        let started = Instant::now();
        let (inputs, targets) = train_loader.next_batch();
        let (inputs, targets) = (inputs.to_vec(), targets.to_vec());
        model.forward(&inputs, Some(&targets), b, t)?;
        model.zero_grad();
        model.backward()?;
        optimizer.update(&mut model, args.learning_rate)?;
        let step_ms = started.elapsed().as_secs_f64() * 1000.0;

        let train_loss = model.mean_loss().unwrap_or(f32::NAN);
        logger.log_step(step, args.learning_rate, train_loss, val, step_ms)?;
    }
    logger.finish()?;
    Ok(())
}
