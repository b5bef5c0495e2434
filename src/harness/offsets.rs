use std::time::Duration;

/// Expands the sampler's `num_workers - 1` offsets (the last worker's
/// offset is always relative zero) into one duration per worker, then
/// shifts every value up so none are negative — `sleep()` can't take a
/// negative duration, so the whole vector is translated by however far
/// below zero the most negative param reaches (never shifted for a
/// positive reason: the shift is `min(0, params...)`, so an
/// all-positive offset set is left untouched).
pub fn normalize(params: &[i64], num_workers: usize) -> Vec<i64> {
    debug_assert_eq!(params.len(), num_workers - 1);

    let mut durations = vec![0i64; num_workers];
    let mut min = 0i64;
    for (i, &p) in params.iter().enumerate() {
        durations[i] = p;
        if p < min {
            min = p;
        }
    }
    for d in &mut durations {
        *d -= min;
    }
    durations
}

pub fn to_sleep_durations(nanos: &[i64]) -> Vec<Duration> {
    nanos
        .iter()
        .map(|&n| Duration::from_nanos(n.max(0) as u64))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn negative_offset_shifts_everything_up() {
        let durations = normalize(&[-5, 3], 3);
        assert_eq!(durations, vec![0, 8, 5]);
    }

    #[test]
    fn all_positive_offsets_are_left_alone() {
        let durations = normalize(&[2, 4], 3);
        assert_eq!(durations, vec![2, 4, 0]);
    }

    #[test]
    fn last_worker_is_always_the_reference_point() {
        let durations = normalize(&[10], 2);
        assert_eq!(durations[1], 0);
    }
}
