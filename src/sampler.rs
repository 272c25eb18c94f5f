//! Token Sampling
//!
//! Draws a token index from a probability distribution by inverting the
//! CDF: walk the cumulative sum until it passes a uniform coin in [0, 1).
//! If floating-point rounding leaves the cumulative sum short of the coin,
//! the last index is returned, so the function always yields a valid
//! index for a normalized row.

/// Sample an index from `probs` using `coin` drawn uniformly from [0, 1).
pub fn sample_from_probs(probs: &[f32], coin: f32) -> usize {
    let mut cdf = 0.0f32;
    for (i, &p) in probs.iter().enumerate() {
        cdf += p;
        if coin < cdf {
            return i;
        }
    }
    probs.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_bucket_containing_the_coin() {
        let probs = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(sample_from_probs(&probs, 0.05), 0);
        assert_eq!(sample_from_probs(&probs, 0.1), 1);
        assert_eq!(sample_from_probs(&probs, 0.29), 1);
        assert_eq!(sample_from_probs(&probs, 0.3), 2);
        assert_eq!(sample_from_probs(&probs, 0.99), 3);
    }

    #[test]
    fn degenerate_distribution_is_deterministic() {
        let probs = [0.0, 0.0, 1.0, 0.0];
        for coin in [0.0, 0.5, 0.999] {
            assert_eq!(sample_from_probs(&probs, coin), 2);
        }
    }

    #[test]
    fn rounding_shortfall_falls_back_to_last_index() {
        // sums to just under 1.0; a coin above the sum must not escape
        let probs = [0.3, 0.3, 0.399];
        assert_eq!(sample_from_probs(&probs, 0.9999), 2);
    }
}
