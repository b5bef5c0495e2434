//! JSON experiment configuration: the race points to probe, their open/
//! trigger/close roles, the optional per-target worker scheduling, and
//! the set of task names ("comms") to restrict tracing to.

mod race_point;
mod sched;

use std::fs::File;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

pub use race_point::{RacePoint, MAX_DESCRIPTION_LEN};
pub use sched::WorkerSchedConfig;

use crate::error::{Error, Result};
use race_point::Role;
use sched::RawSchedEntry;

/// Default experiment name used for CSV output and log lines when the
/// config omits `"name"`.
pub const DEFAULT_NAME: &str = "race";

/// A fully validated experiment configuration.
pub struct Config {
    pub name: String,
    pub race_points: Vec<RacePoint>,
    pub sched: Vec<WorkerSchedConfig>,
    pub comms: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawConfig {
    name: Option<String>,
    #[serde(default)]
    opened_by: StringOrVec,
    #[serde(default)]
    triggered_by: StringOrVec,
    #[serde(default)]
    closed_by: StringOrVec,
    #[serde(default)]
    comms: StringOrVec,
    #[serde(default)]
    sched: Vec<RawSchedEntry>,
}

/// Accepts either a single string or an array of strings for the
/// `opened_by`/`triggered_by`/`closed_by`/`comms` fields.
#[derive(Default)]
struct StringOrVec(Vec<String>);

impl<'de> Deserialize<'de> for StringOrVec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::Null => Ok(StringOrVec(Vec::new())),
            Value::String(s) => Ok(StringOrVec(vec![s])),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s),
                        other => {
                            return Err(serde::de::Error::custom(format!(
                                "expected a string, got {other}"
                            )))
                        }
                    }
                }
                Ok(StringOrVec(out))
            }
            other => Err(serde::de::Error::custom(format!(
                "expected a string or an array of strings, got {other}"
            ))),
        }
    }
}

impl Config {
    /// Parses and validates the JSON config at `path`.
    ///
    /// `num_targets` is the number of probe-bearing functions the
    /// caller's program was linked against; it sizes the per-target
    /// `sched` array.
    pub fn from_file(path: impl AsRef<Path>, num_targets: usize) -> Result<Config> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::system(format!("opening config {}", path.display()), e))?;
        let raw: RawConfig = serde_json::from_reader(file)
            .map_err(|e| Error::config(format!("parsing {}: {e}", path.display())))?;
        Self::from_raw(raw, num_targets)
    }

    fn from_raw(raw: RawConfig, num_targets: usize) -> Result<Config> {
        if raw.opened_by.0.is_empty() {
            return Err(Error::config("please specify at least one symbol in opened_by"));
        }
        if raw.triggered_by.0.is_empty() {
            return Err(Error::config(
                "please specify at least one symbol in triggered_by",
            ));
        }
        if raw.closed_by.0.is_empty() {
            return Err(Error::config("please specify at least one symbol in closed_by"));
        }

        let mut race_points = Vec::new();
        race_point::merge_points(&mut race_points, &raw.opened_by.0, Role::Open)?;
        race_point::merge_points(&mut race_points, &raw.triggered_by.0, Role::Trigger)?;
        race_point::merge_points(&mut race_points, &raw.closed_by.0, Role::Close)?;

        let sched = sched::build_sched_configs(&raw.sched, num_targets)?;

        Ok(Config {
            name: raw.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            race_points,
            sched,
            comms: raw.comms.0,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn raw(json: &str) -> RawConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_config_defaults_name_and_comms() {
        let cfg = Config::from_raw(
            raw(r#"{"opened_by": "a", "triggered_by": "a", "closed_by": "a"}"#),
            1,
        )
        .unwrap();
        assert_eq!(cfg.name, DEFAULT_NAME);
        assert!(cfg.comms.is_empty());
        assert_eq!(cfg.race_points.len(), 1);
        assert_eq!(cfg.sched.len(), 1);
    }

    #[test]
    fn string_or_array_both_accepted() {
        let cfg = Config::from_raw(
            raw(r#"{"opened_by": ["a", "b"], "triggered_by": "a", "closed_by": ["a", "c"], "name": "n"}"#),
            2,
        )
        .unwrap();
        assert_eq!(cfg.name, "n");
        assert_eq!(cfg.race_points.len(), 3);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        assert!(Config::from_raw(raw(r#"{"opened_by": "a", "triggered_by": "a"}"#), 1).is_err());
    }

    #[test]
    fn comms_list_is_preserved() {
        let cfg = Config::from_raw(
            raw(r#"{"opened_by": "a", "triggered_by": "a", "closed_by": "a", "comms": ["fsstress"]}"#),
            1,
        )
        .unwrap();
        assert_eq!(cfg.comms, vec!["fsstress".to_string()]);
    }
}
