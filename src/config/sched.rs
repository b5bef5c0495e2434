use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::ffi::syscall::SchedPolicy;
use crate::ffi::CpuSet;

/// Per-worker scheduling configuration: which policy/priority to request
/// for the worker thread and which CPUs it may run on.
#[derive(Clone)]
pub struct WorkerSchedConfig {
    pub policy: SchedPolicy,
    pub priority: i32,
    pub cpus: CpuSet,
}

impl WorkerSchedConfig {
    fn other() -> Self {
        WorkerSchedConfig {
            policy: SchedPolicy::Other,
            priority: 0,
            cpus: CpuSet::empty(),
        }
    }
}

/// One element of the optional top-level `"sched"` array. `None` fields
/// fall back to the defaults used when the array is absent entirely, or
/// shorter than the number of race points.
#[derive(Deserialize, Default)]
pub(super) struct RawSchedEntry {
    policy: Option<Value>,
    cpus: Option<Vec<i64>>,
}

fn parse_policy(value: Option<&Value>) -> Result<(SchedPolicy, i32)> {
    let value = match value {
        None => return Ok((SchedPolicy::Other, 0)),
        Some(v) => v,
    };
    if let Some(n) = value.as_i64() {
        let policy = match n {
            x if x == libc::SCHED_OTHER as i64 => SchedPolicy::Other,
            x if x == libc::SCHED_FIFO as i64 => SchedPolicy::Fifo,
            x if x == libc::SCHED_RR as i64 => SchedPolicy::Rr,
            _ => return Err(Error::config(format!("unrecognized numeric sched policy {n}"))),
        };
        let priority = policy.default_priority();
        return Ok((policy, priority));
    }
    if let Some(s) = value.as_str() {
        let policy = match s {
            "SCHED_OTHER" => SchedPolicy::Other,
            "SCHED_FIFO" => SchedPolicy::Fifo,
            "SCHED_RR" => SchedPolicy::Rr,
            other => return Err(Error::config(format!("sched policy \"{other}\" unrecognized"))),
        };
        let priority = policy.default_priority();
        return Ok((policy, priority));
    }
    Err(Error::config(format!(
        "sched policy config \"{value}\" has bad type"
    )))
}

fn parse_cpus(cpus: Option<&[i64]>) -> Result<CpuSet> {
    let cpus = match cpus {
        None => return CpuSet::inherited(),
        Some(c) if c.is_empty() => return CpuSet::inherited(),
        Some(c) => c,
    };
    let mut set = CpuSet::empty();
    for &cpu in cpus {
        if cpu < 0 || cpu as usize >= libc::CPU_SETSIZE as usize {
            return Err(Error::config(format!("invalid cpu number: {cpu}")));
        }
        set.insert(cpu as usize);
    }
    Ok(set)
}

impl RawSchedEntry {
    pub(super) fn validate(&self) -> Result<WorkerSchedConfig> {
        let (policy, priority) = parse_policy(self.policy.as_ref())?;
        let cpus = parse_cpus(self.cpus.as_deref())?;
        Ok(WorkerSchedConfig {
            policy,
            priority,
            cpus,
        })
    }
}

/// Builds one [`WorkerSchedConfig`] per target, pulling from `raw` by
/// index and falling back to `SCHED_OTHER`/inherited affinity for any
/// target past the end of a shorter-than-`num_targets` array (logging a
/// warning, matching the original's "has more elements than functions
/// given" / the symmetric "fewer" case).
pub(super) fn build_sched_configs(
    raw: &[RawSchedEntry],
    num_targets: usize,
) -> Result<Vec<WorkerSchedConfig>> {
    if raw.len() > num_targets {
        log::warn!(
            "\"sched\" config has {} entries but only {} race targets; truncating",
            raw.len(),
            num_targets
        );
    }
    let mut out = Vec::with_capacity(num_targets);
    for i in 0..num_targets {
        match raw.get(i) {
            Some(entry) => out.push(entry.validate()?),
            None => out.push(WorkerSchedConfig::other()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_policy_is_sched_other_priority_zero() {
        let (policy, priority) = parse_policy(None).unwrap();
        assert_eq!(policy, SchedPolicy::Other);
        assert_eq!(priority, 0);
    }

    #[test]
    fn string_policy_names_are_recognized() {
        let (policy, priority) = parse_policy(Some(&Value::String("SCHED_FIFO".into()))).unwrap();
        assert_eq!(policy, SchedPolicy::Fifo);
        assert_eq!(priority, 1);
    }

    #[test]
    fn unknown_policy_name_is_rejected() {
        assert!(parse_policy(Some(&Value::String("SCHED_WAT".into()))).is_err());
    }

    #[test]
    fn out_of_range_cpu_is_rejected() {
        assert!(parse_cpus(Some(&[-1])).is_err());
    }

    #[test]
    fn truncation_warning_does_not_error() {
        let raw = vec![RawSchedEntry::default(), RawSchedEntry::default()];
        let built = build_sched_configs(&raw, 1).unwrap();
        assert_eq!(built.len(), 1);
    }

    #[test]
    fn shorter_array_fills_remaining_with_defaults() {
        let raw = vec![RawSchedEntry::default()];
        let built = build_sched_configs(&raw, 3).unwrap();
        assert_eq!(built.len(), 3);
        assert_eq!(built[2].policy, SchedPolicy::Other);
    }
}
