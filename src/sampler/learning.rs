use std::cmp::Ordering;
use std::collections::BTreeSet;

use rand::Rng;

use super::bucket::{build_buckets, Bucket};
use super::Sampler;
use crate::error::Result;

/// A bucket's sort key in the learning sampler's ordered set: buckets
/// are ordered by descending race probability, and by ascending bucket
/// id as a stable tiebreaker when two buckets have the same
/// probability (most commonly both still at their initial `0.0`).
#[derive(Clone, Copy, PartialEq)]
struct BucketKey {
    neg_probability: f64,
    id: usize,
}

impl Eq for BucketKey {}

impl PartialOrd for BucketKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.neg_probability
            .total_cmp(&other.neg_probability)
            .then(self.id.cmp(&other.id))
    }
}

impl BucketKey {
    fn of(bucket: &Bucket) -> Self {
        BucketKey {
            neg_probability: -bucket.probability,
            id: bucket.id,
        }
    }
}

/// Treats offset selection as a multi-armed bandit: the offset space is
/// carved into buckets, and each round either explores a uniformly
/// random bucket or exploits one of the best-scoring buckets seen so
/// far, biased by `explore_probability`.
pub struct LearningSampler {
    buckets: Vec<Bucket>,
    ordered: BTreeSet<BucketKey>,
    current: usize,
    explore_probability: f64,
    found_something: bool,
    rng: rand::rngs::StdRng,
}

impl LearningSampler {
    pub(super) fn new(durations: &[i64], explore_probability: f64, rng: rand::rngs::StdRng) -> Result<Self> {
        let buckets = build_buckets(durations)?;
        let ordered = buckets.iter().map(BucketKey::of).collect();
        Ok(LearningSampler {
            buckets,
            ordered,
            current: 0,
            explore_probability,
            found_something: false,
            rng,
        })
    }

    /// Picks one of the top-10 scoring buckets (by current estimated
    /// race probability) at random, but gives up on probabilities below
    /// `0.0001` once at least one candidate has been picked: a thin
    /// tail of near-zero-probability buckets isn't worth exploiting.
    /// Always returns a bucket id — if every candidate up to the random
    /// draw scores below the threshold, the last one considered before
    /// the cutoff is returned rather than nothing.
    fn random_top_bucket(&mut self) -> usize {
        let size = self.ordered.len();
        let n = size.min(10);
        let mut idx = self.rng.gen_range(0..n);

        let mut chosen = None;
        for key in self.ordered.iter() {
            let probability = self.buckets[key.id].probability;
            if probability < 0.0001 && chosen.is_some() {
                break;
            }
            chosen = Some(key.id);
            if idx == 0 {
                break;
            }
            idx -= 1;
        }
        chosen.expect("ordered set of buckets is never empty")
    }
}

impl Sampler for LearningSampler {
    fn num_params(&self) -> usize {
        self.buckets[0].left_edges.len()
    }

    fn next_params(&mut self) -> Vec<i64> {
        let explore_roll: f64 = self.rng.gen();
        let id = if self.found_something && explore_roll > self.explore_probability {
            self.random_top_bucket()
        } else {
            self.rng.gen_range(0..self.buckets.len())
        };
        self.current = id;
        self.buckets[id].random_point(&mut self.rng)
    }

    fn report(&mut self, count: u32, triggers: u32) {
        if count < 1 {
            return;
        }
        if triggers > 0 {
            self.found_something = true;
        }

        let bucket = &mut self.buckets[self.current];
        let old_key = BucketKey::of(bucket);
        self.ordered.remove(&old_key);

        let p = triggers as f64 / count as f64;
        bucket.probability += (p - bucket.probability) * count as f64 / (bucket.count + count as u64) as f64;
        bucket.count += count as u64;

        self.ordered.insert(BucketKey::of(bucket));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    fn sampler() -> LearningSampler {
        LearningSampler::new(&[1_000_000, 1_000_000, 1_000_000], 0.2, rand::rngs::StdRng::seed_from_u64(1))
            .unwrap()
    }

    #[test]
    fn next_params_has_one_value_per_dimension() {
        let mut s = sampler();
        let params = s.next_params();
        assert_eq!(params.len(), s.num_params());
    }

    #[test]
    fn reporting_a_trigger_marks_found_something() {
        let mut s = sampler();
        s.next_params();
        assert!(!s.found_something);
        s.report(10, 1);
        assert!(s.found_something);
    }

    #[test]
    fn zero_count_report_is_a_noop() {
        let mut s = sampler();
        s.next_params();
        let before: Vec<_> = s.ordered.iter().copied().collect();
        s.report(0, 0);
        let after: Vec<_> = s.ordered.iter().copied().collect();
        assert_eq!(before.len(), after.len());
        assert!(!s.found_something);
    }

    #[test]
    fn repeated_triggers_raise_bucket_to_the_top() {
        let mut s = sampler();
        for _ in 0..50 {
            s.next_params();
            let winner = s.current;
            s.buckets[winner].probability = 0.0;
            s.current = winner;
            s.report(10, 10);
        }
        let best = *s.ordered.iter().next().unwrap();
        assert!(s.buckets[best.id].probability > 0.5);
    }
}
