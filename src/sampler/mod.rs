//! Offset samplers: pick, each round, an offset to apply to every race
//! target but the last (the last target's "offset" is always zero —
//! offsets are relative), then fold the round's trigger count back in
//! to steer later picks.

mod bucket;
mod learning;
mod random;

use rand::SeedableRng;

pub use learning::LearningSampler;
pub use random::RandomSampler;

use crate::error::Result;

pub trait Sampler {
    /// Number of offset values [`Self::next_params`] returns: one less
    /// than the number of race targets, since the last target's offset
    /// is pinned at zero.
    fn num_params(&self) -> usize;

    /// Picks the offsets to use for the next round.
    fn next_params(&mut self) -> Vec<i64>;

    /// Folds the outcome of the round just run back into the sampler's
    /// model: `count` user threads observed, `triggers` of which hit
    /// the race's trigger point while the race was open.
    fn report(&mut self, count: u32, triggers: u32);
}

fn seed_rng() -> rand::rngs::StdRng {
    match rand::rngs::StdRng::from_rng(rand::rngs::OsRng) {
        Ok(rng) => rng,
        Err(e) => {
            log::warn!("not seeding RNG from OS entropy ({e}); falling back to a weaker seed");
            rand::rngs::StdRng::from_entropy()
        }
    }
}

/// Builds a multi-armed-bandit sampler over the offset space implied by
/// `baseline_durations` (one measured baseline duration per race
/// target), exploring uniformly at random with probability
/// `explore_probability` and otherwise exploiting the best-scoring
/// buckets found so far.
pub fn learning(baseline_durations: &[i64], explore_probability: f64) -> Result<LearningSampler> {
    LearningSampler::new(baseline_durations, explore_probability, seed_rng())
}

/// Builds a sampler that always picks a uniformly random offset, with
/// no learning.
pub fn random(baseline_durations: &[i64]) -> Result<RandomSampler> {
    RandomSampler::new(baseline_durations, seed_rng())
}
