use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::percpu::RawEvent;
use super::RacePointRuntime;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundOutcome {
    pub count: u64,
    pub triggers: u64,
    /// Total number of raw records popped off the merge, tracked or
    /// not — the "how much data did we even look at" figure the
    /// overrun-driven sample-size back-off is scaled against.
    pub entries: u64,
    /// Sticky for the round: `true` if any per-CPU reader saw
    /// `RB_MISSED_EVENTS` while draining. Distinct from the `overrun`
    /// stats-file counter — this is the signal that invalidates the
    /// round outright; `overrun` only feeds the sample-size back-off.
    /// Set by [`super::Tracer::collect`], not by this merge itself.
    pub missed_events: bool,
}

struct TaskStatus {
    open: bool,
}

/// Merges one already-time-ordered event vector per CPU into a single
/// global-timestamp-ordered stream via a `BinaryHeap` keyed by
/// `(timestamp, cpu_index)`, and scores it against the race-point state
/// machine as each event is popped.
///
/// Events for pids not in `tracked_pids`, or whose event id doesn't
/// match a configured race point, are skipped entirely — they never
/// reach the state machine.
pub fn merge_and_score(
    cpu_events: &[Vec<RawEvent>],
    tracked_pids: &HashSet<i32>,
    points_by_event_id: &HashMap<u64, RacePointRuntime>,
) -> RoundOutcome {
    let mut cursor = vec![0usize; cpu_events.len()];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();
    for (cpu, events) in cpu_events.iter().enumerate() {
        if let Some(ev) = events.first() {
            heap.push(Reverse((ev.timestamp, cpu)));
        }
    }

    let mut status: HashMap<i32, TaskStatus> = HashMap::new();
    let mut outcome = RoundOutcome::default();

    while let Some(Reverse((_, cpu))) = heap.pop() {
        let idx = cursor[cpu];
        let ev = cpu_events[cpu][idx];
        cursor[cpu] += 1;
        if let Some(next) = cpu_events[cpu].get(cursor[cpu]) {
            heap.push(Reverse((next.timestamp, cpu)));
        }
        outcome.entries += 1;

        if !tracked_pids.contains(&ev.pid) {
            continue;
        }
        let point = match points_by_event_id.get(&ev.event_id) {
            Some(p) => p,
            None => continue,
        };

        // Triggers are scored against every *other* tracked task's
        // open status before this event's own open/close is applied.
        if point.triggers {
            let others_open = status
                .iter()
                .filter(|(&pid, s)| pid != ev.pid && s.open)
                .count() as u64;
            outcome.triggers += others_open;
        }

        let task = status.entry(ev.pid).or_insert(TaskStatus { open: false });
        if point.opens && !task.open {
            task.open = true;
        } else if point.closes && task.open {
            outcome.count += 1;
            task.open = false;
        }
    }

    outcome
}

#[cfg(test)]
mod test {
    use super::*;

    fn point(opens: bool, triggers: bool, closes: bool) -> RacePointRuntime {
        RacePointRuntime {
            name: String::new(),
            event_id: 0,
            opens,
            triggers,
            closes,
        }
    }

    fn ev(timestamp: u64, event_id: u64, pid: i32) -> RawEvent {
        RawEvent {
            timestamp,
            event_id,
            pid,
        }
    }

    #[test]
    fn single_cpu_open_trigger_close_sequence() {
        let points: HashMap<u64, RacePointRuntime> = [
            (10, point(true, false, false)),
            (20, point(false, true, false)),
            (30, point(false, false, true)),
        ]
        .into_iter()
        .collect();
        let tracked: HashSet<i32> = [1, 2].into_iter().collect();

        let stream = vec![ev(1, 10, 1), ev(2, 10, 2), ev(3, 20, 2), ev(4, 30, 1), ev(5, 30, 2)];

        let outcome = merge_and_score(&[stream], &tracked, &points);
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.triggers, 1);
    }

    #[test]
    fn same_scenario_split_across_two_cpus_merges_in_timestamp_order() {
        let points: HashMap<u64, RacePointRuntime> = [
            (10, point(true, false, false)),
            (20, point(false, true, false)),
            (30, point(false, false, true)),
        ]
        .into_iter()
        .collect();
        let tracked: HashSet<i32> = [1, 2].into_iter().collect();

        let cpu0 = vec![ev(1, 10, 1), ev(4, 30, 1)];
        let cpu1 = vec![ev(2, 10, 2), ev(3, 20, 2), ev(5, 30, 2)];

        let outcome = merge_and_score(&[cpu0, cpu1], &tracked, &points);
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.triggers, 1);
    }

    #[test]
    fn untracked_pid_is_ignored() {
        let points: HashMap<u64, RacePointRuntime> =
            [(10, point(true, false, false)), (30, point(false, false, true))]
                .into_iter()
                .collect();
        let tracked: HashSet<i32> = [1].into_iter().collect();

        let stream = vec![ev(1, 10, 99), ev(2, 30, 99)];
        let outcome = merge_and_score(&[stream], &tracked, &points);
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.triggers, 0);
    }
}
