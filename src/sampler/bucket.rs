use crate::error::{Error, Result};

/// Maximum number of buckets to carve the offset space into. Chosen
/// arbitrarily, the same way the original tool picked 100,000: big
/// enough to resolve a race window, small enough that a learning pass
/// converges in a reasonable number of rounds.
const MAX_BUCKETS: i64 = 100_000;

/// One bucket of the offset space: an axis-aligned box plus the
/// running race-probability estimate the learning sampler maintains
/// for it.
#[derive(Clone, Debug)]
pub struct Bucket {
    pub id: usize,
    pub left_edges: Vec<i64>,
    pub right_edges: Vec<i64>,
    pub count: u64,
    pub probability: f64,
}

impl Bucket {
    /// A uniformly random point inside this bucket's box.
    pub(super) fn random_point(&self, rng: &mut impl rand::Rng) -> Vec<i64> {
        self.left_edges
            .iter()
            .zip(&self.right_edges)
            .map(|(&lo, &hi)| rng.gen_range(lo..hi))
            .collect()
    }
}

/// For each dimension, how far early (`left`) and late (`right`, in
/// nanoseconds) one race point's trigger time could meaningfully be
/// shifted relative to its neighbor, given the measured baseline
/// durations between race points.
fn param_boundaries(durations: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let num_dimensions = durations.len() - 1;
    let total: i64 = durations.iter().sum();
    let mut left = vec![0i64; num_dimensions];
    let mut right = vec![0i64; num_dimensions];
    for i in 0..num_dimensions {
        left[i] = -total;
        right[i] = total - durations[i];
    }
    (left, right)
}

/// `x^(1/n)`, rounded to the nearest integer. `n == 1` is the identity.
fn nth_root(n: u32, x: i64) -> i64 {
    if n == 1 {
        return x;
    }
    (x as f64).powf(1.0 / n as f64).round() as i64
}

struct BucketShape {
    edge_length: i64,
    dimension_num_buckets: Vec<i64>,
    num_buckets: i64,
}

fn bucket_shape(left: &[i64], right: &[i64]) -> Result<BucketShape> {
    let num_dimensions = left.len();
    let mut bucket_volume: i64 = 1;
    for i in 0..num_dimensions {
        bucket_volume = bucket_volume.checked_mul(right[i] - left[i]).ok_or_else(|| {
            Error::Sampler("multiplication overflow, too many race targets given".into())
        })?;
    }
    bucket_volume = bucket_volume / MAX_BUCKETS + 1;

    let mut edge_length = nth_root(num_dimensions as u32, bucket_volume);
    if edge_length < 100 {
        edge_length = 100;
    }

    let mut dimension_num_buckets = vec![0i64; num_dimensions];
    let mut num_buckets: i64 = 1;
    for i in 0..num_dimensions {
        // round up division
        dimension_num_buckets[i] = (right[i] - left[i] + edge_length - 1) / edge_length;
        num_buckets *= dimension_num_buckets[i];
    }
    Ok(BucketShape {
        edge_length,
        dimension_num_buckets,
        num_buckets,
    })
}

/// Carves the offset space implied by `durations` (one baseline
/// duration per race target, `num_targets` long) into a grid of
/// buckets, laid out in mixed-radix order so bucket `i`'s per-dimension
/// index is `i`'s digits in the `dimension_num_buckets` radix system.
pub fn build_buckets(durations: &[i64]) -> Result<Vec<Bucket>> {
    let (left, right) = param_boundaries(durations);
    let shape = bucket_shape(&left, &right)?;
    let num_dimensions = left.len();

    let mut buckets = Vec::with_capacity(shape.num_buckets as usize);
    for i in 0..shape.num_buckets {
        let mut bucket_left = vec![0i64; num_dimensions];
        let mut bucket_right = vec![0i64; num_dimensions];
        let mut q: i64 = 1;
        for j in 0..num_dimensions {
            let idx = (i / q) % shape.dimension_num_buckets[j];
            bucket_left[j] = left[j] + shape.edge_length * idx;
            bucket_right[j] = bucket_left[j] + shape.edge_length;
            q *= shape.dimension_num_buckets[j];
        }
        buckets.push(Bucket {
            id: i as usize,
            left_edges: bucket_left,
            right_edges: bucket_right,
            count: 0,
            probability: 0.0,
        });
    }
    Ok(buckets)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn param_boundaries_matches_worked_example() {
        let (left, right) = param_boundaries(&[100, 200, 300]);
        assert_eq!(left, vec![-600, -600]);
        assert_eq!(right, vec![500, 400]);
    }

    #[test]
    fn three_targets_give_two_dimensional_buckets() {
        let buckets = build_buckets(&[1_000_000, 1_000_000, 1_000_000]).unwrap();
        assert!(!buckets.is_empty());
        for b in &buckets {
            assert_eq!(b.left_edges.len(), 2);
            assert_eq!(b.right_edges.len(), 2);
            for d in 0..2 {
                assert!(b.left_edges[d] < b.right_edges[d]);
            }
        }
    }

    #[test]
    fn nth_root_identity_for_one_dimension() {
        assert_eq!(nth_root(1, 12345), 12345);
    }

    #[test]
    fn overflow_is_reported_as_sampler_error() {
        let huge = i64::MAX / 2;
        assert!(bucket_shape(&[0, 0], &[huge, huge]).is_err());
    }
}
