use rand::Rng;

use super::Sampler;
use crate::error::Result;

/// Picks a uniformly random offset point every round, with no learning.
/// Used for the `--no-trace` baseline pass, where there's no trigger
/// count to learn from.
pub struct RandomSampler {
    left_edges: Vec<i64>,
    right_edges: Vec<i64>,
    rng: rand::rngs::StdRng,
}

impl RandomSampler {
    pub(super) fn new(durations: &[i64], rng: rand::rngs::StdRng) -> Result<Self> {
        let num_dimensions = durations.len() - 1;
        let total: i64 = durations.iter().sum();
        let mut left = vec![0i64; num_dimensions];
        let mut right = vec![0i64; num_dimensions];
        for i in 0..num_dimensions {
            left[i] = -total;
            right[i] = total - durations[i];
        }
        Ok(RandomSampler {
            left_edges: left,
            right_edges: right,
            rng,
        })
    }
}

impl Sampler for RandomSampler {
    fn num_params(&self) -> usize {
        self.left_edges.len()
    }

    fn next_params(&mut self) -> Vec<i64> {
        self.left_edges
            .iter()
            .zip(&self.right_edges)
            .map(|(&lo, &hi)| self.rng.gen_range(lo..hi))
            .collect()
    }

    fn report(&mut self, _count: u32, _triggers: u32) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn params_stay_within_bounds() {
        let mut s = RandomSampler::new(&[1_000_000, 1_000_000], rand::rngs::StdRng::seed_from_u64(0)).unwrap();
        for _ in 0..100 {
            let params = s.next_params();
            assert_eq!(params.len(), 1);
            assert!(params[0] >= s.left_edges[0]);
            assert!(params[0] < s.right_edges[0]);
        }
    }
}
