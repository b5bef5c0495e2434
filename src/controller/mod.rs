//! Wires Config, Sampler, Harness, and Tracer into the two top-level
//! loops a caller actually runs: tracing-on experiments, scored against
//! race points and written to CSV, or blind notrace hammering with no
//! tracer at all.

use std::fs::File;
use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ffi::CpuSet;
use crate::harness::{Callbacks, Harness, RaceWorker};
use crate::sampler::{self, Sampler};
use crate::tracer::{SigintFlag, Tracer};

/// Shrinks the per-round sample count in proportion to how much the
/// ring buffer overran relative to how many records it actually held,
/// porting the original's `adjust_samples`. Floored at 2.
fn adjust_samples(samples: u32, entries: u64, overrun_delta: u64) -> u32 {
    let samples = samples as u64;
    let denom = (overrun_delta + entries) * 2;
    if denom == 0 {
        return 2;
    }
    ((entries * samples) / denom).max(2) as u32
}

fn union_cpus(config: &Config) -> CpuSet {
    let mut union = CpuSet::empty();
    for sched in &config.sched {
        union.union_with(&sched.cpus);
    }
    union
}

fn csv_header(num_params: usize, name: &str) -> Vec<String> {
    let mut header: Vec<String> = (0..num_params).map(|i| format!("offset {i}")).collect();
    header.push(format!("{name} count"));
    header.push(format!("{name} triggers"));
    header
}

fn csv_row(params: &[i64], count: u64, triggers: u64) -> Vec<String> {
    let mut row: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    let ratio = if count > 0 { triggers as f64 / count as f64 } else { 0.0 };
    row.push(count.to_string());
    row.push(format!("{ratio:.6}"));
    row
}

/// Runs the tracing-on experiment loop: installs kprobes, starts the
/// worker harness, repeatedly asks the learning sampler for an offset
/// vector, runs enough rounds to accumulate 100 non-overrun samples,
/// reports the outcome back to the sampler, and appends one CSV row.
///
/// Runs until SIGINT arrives (`sigint` is polled once per iteration),
/// at which point the tracer and harness are torn down and this
/// returns `Ok(())`.
pub fn experiment_loop<W: RaceWorker>(
    config: Config,
    workers: Vec<W>,
    callbacks: Callbacks,
    explore_probability: f64,
    out_file: &Path,
    sigint: SigintFlag,
) -> Result<()> {
    let cpus = union_cpus(&config);
    let mut tracer = Tracer::install(&config.race_points, &cpus)?;

    let mut overrun = tracer.overrun()?;

    let harness = Harness::spawn(workers, config.sched.clone(), callbacks)?;
    let baselines = harness.measure_baselines()?;

    for &tid in harness.tids() {
        tracer.add_pid(tid);
    }
    tracer.add_comms(&config.comms)?;

    let mut sampler = sampler::learning(&baselines, explore_probability)?;

    let file = File::create(out_file)
        .map_err(|e| Error::system(format!("creating {}", out_file.display()), e))?;
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(csv_header(sampler.num_params(), &config.name))
        .map_err(|e| Error::system("writing csv header", io_err(e)))?;

    let mut round_samples: u32 = 100;
    let result = (|| -> Result<()> {
        loop {
            if sigint.caught() {
                return Ok(());
            }

            let params = sampler.next_params();
            harness.set_offsets(&params);

            let mut valid_samples: u32 = 0;
            let mut count = 0u64;
            let mut triggers = 0u64;
            while valid_samples < 100 {
                if sigint.caught() {
                    return Ok(());
                }

                tracer.enable_tracing()?;
                harness.run_round(round_samples)?;
                tracer.disable_tracing()?;

                let overrun_before = overrun;
                let (outcome, overrun_after) = tracer.collect()?;
                overrun = overrun_after;

                if !outcome.missed_events {
                    valid_samples += round_samples;
                    count += outcome.count;
                    triggers += outcome.triggers;
                } else if round_samples > 2 {
                    let delta = overrun_after.saturating_sub(overrun_before);
                    round_samples = adjust_samples(round_samples, outcome.entries, delta);
                    if round_samples < 2 {
                        log::warn!(
                            "ftrace buffers filling quickly; using 2 samples per round, might be losing data"
                        );
                        round_samples = 2;
                    }
                }
            }

            sampler.report(count as u32, triggers as u32);
            writer
                .write_record(csv_row(&params, count, triggers))
                .map_err(|e| Error::system("writing csv row", io_err(e)))?;
            writer
                .flush()
                .map_err(|e| Error::system("flushing csv writer", e))?;
        }
    })();

    harness.shutdown();
    harness.join();
    tracer.teardown();
    result
}

/// Runs the notrace loop: no kprobes, no CSV, just a random sampler
/// hammering offsets at 1000 samples per round, forever, until SIGINT.
pub fn notrace_loop<W: RaceWorker>(
    config: Config,
    workers: Vec<W>,
    callbacks: Callbacks,
    sigint: SigintFlag,
) -> Result<()> {
    let harness = Harness::spawn(workers, config.sched.clone(), callbacks)?;
    let baselines = harness.measure_baselines()?;
    let mut sampler = sampler::random(&baselines)?;

    let result = (|| -> Result<()> {
        loop {
            if sigint.caught() {
                return Ok(());
            }
            let params = sampler.next_params();
            harness.set_offsets(&params);
            harness.run_round(1000)?;
        }
    })();

    harness.shutdown();
    harness.join();
    result
}

fn io_err(e: csv::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adjust_samples_matches_worked_example() {
        assert_eq!(adjust_samples(100, 50, 50), 25);
    }

    #[test]
    fn adjust_samples_floors_at_two() {
        assert_eq!(adjust_samples(4, 1, 1000), 2);
    }

    #[test]
    fn csv_header_names_offsets_and_name_prefixed_columns() {
        let header = csv_header(2, "race");
        assert_eq!(header, vec!["offset 0", "offset 1", "race count", "race triggers"]);
    }

    #[test]
    fn csv_row_computes_trigger_ratio() {
        let row = csv_row(&[10, 20], 4, 1);
        assert_eq!(row[2], "4");
        assert_eq!(row[3], "0.250000");
    }

    #[test]
    fn csv_row_ratio_is_zero_when_count_is_zero() {
        let row = csv_row(&[0], 0, 0);
        assert_eq!(row[2], "0.000000");
    }
}
