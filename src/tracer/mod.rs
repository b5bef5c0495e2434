//! Kprobe installation, ring-buffer draining, and per-round race
//! scoring. Only the controller's single thread ever touches a
//! [`Tracer`] — it owns process-wide state (tracefs control files, the
//! installed kprobes) that a second instance would stomp on.

mod format;
mod merge;
mod percpu;
mod tracefs;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RacePoint;
use crate::error::{Error, Result};
use crate::ffi::{syscall, CpuSet};

pub use merge::RoundOutcome;

/// A race point as tracked at runtime: its installed kprobe name,
/// resolved ftrace event id, and the same role flags as its
/// [`RacePoint`] source.
#[derive(Clone, Debug)]
pub struct RacePointRuntime {
    pub name: String,
    pub event_id: u64,
    pub opens: bool,
    pub triggers: bool,
    pub closes: bool,
}

/// Set by the process's SIGINT handler; the controller polls
/// [`caught`](Self::caught) between rounds and tears the tracer down
/// once it goes up, instead of running arbitrary cleanup logic inside
/// the signal handler itself.
#[derive(Clone)]
pub struct SigintFlag(Arc<AtomicBool>);

impl SigintFlag {
    pub fn caught(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Installs a process-wide SIGINT flag. Call once, near start-up.
pub fn install_sigint_handler() -> Result<SigintFlag> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))
        .map_err(|e| Error::system("registering SIGINT handler", e))?;
    Ok(SigintFlag(flag))
}

pub struct Tracer {
    fs: tracefs::Tracefs,
    points: Vec<RacePointRuntime>,
    points_by_event_id: HashMap<u64, RacePointRuntime>,
    readers: Vec<percpu::PerCpuReader>,
    common_type: (usize, usize),
    common_pid: (usize, usize),
    tracked_pids: HashSet<i32>,
}

impl Tracer {
    /// Switches the global tracer to `nop`, installs one kprobe per
    /// race point, and opens a non-blocking raw pipe for every CPU in
    /// `cpus` (the union of every worker's affinity mask). Unwinds
    /// whatever kprobes it already installed on any failure along the
    /// way.
    pub fn install(race_points: &[RacePoint], cpus: &CpuSet) -> Result<Tracer> {
        let fs = tracefs::Tracefs::open()?;
        fs.set_tracer("nop")?;

        let mut installed: Vec<(RacePointRuntime, format::Field, format::Field)> = Vec::new();
        let setup = (|| -> Result<()> {
            for (i, rp) in race_points.iter().enumerate() {
                let name = format!("k_race_{i}");
                let kind = if rp.is_return_probe() { 'r' } else { 'p' };
                fs.add_kprobe(kind, &name, rp.symbol())?;

                let format_text = fs.read_format(&name)?;
                let parsed = format::parse(&format_text)?;
                fs.enable_kprobe(&name)?;

                installed.push((
                    RacePointRuntime {
                        name,
                        event_id: parsed.id,
                        opens: rp.opens,
                        triggers: rp.triggers,
                        closes: rp.closes,
                    },
                    parsed.common_type,
                    parsed.common_pid,
                ));
            }
            Ok(())
        })();

        if let Err(e) = setup {
            for (runtime, _, _) in &installed {
                fs.remove_kprobe(&runtime.name);
            }
            return Err(e);
        }

        let (common_type, common_pid) = match installed.first() {
            Some((_, ct, cp)) => ((ct.offset, ct.size), (cp.offset, cp.size)),
            None => return Err(Error::config("at least one race point is required")),
        };

        let points: Vec<RacePointRuntime> = installed.into_iter().map(|(r, _, _)| r).collect();
        let points_by_event_id = points.iter().map(|p| (p.event_id, p.clone())).collect();

        let page_size = syscall::page_size();
        let per_cpu_dir = fs.per_cpu_dir();
        let mut readers = Vec::new();
        for cpu in cpus.iter() {
            match percpu::PerCpuReader::open(cpu, &per_cpu_dir, page_size) {
                Ok(r) => readers.push(r),
                Err(e) => {
                    for point in &points {
                        fs.remove_kprobe(&point.name);
                    }
                    return Err(e);
                }
            }
        }

        Ok(Tracer {
            fs,
            points,
            points_by_event_id,
            readers,
            common_type,
            common_pid,
            tracked_pids: HashSet::new(),
        })
    }

    /// Registers a worker's (or a comm-resolved task's) pid as one to
    /// score events against.
    pub fn add_pid(&mut self, pid: i32) {
        self.tracked_pids.insert(pid);
    }

    /// Resolves each configured comm against every `/proc/<pid>/comm`
    /// and registers every pid whose comm matches.
    pub fn add_comms(&mut self, comms: &[String]) -> Result<()> {
        if comms.is_empty() {
            return Ok(());
        }
        let entries = std::fs::read_dir("/proc").map_err(|e| Error::system("reading /proc", e))?;
        for entry in entries.flatten() {
            let pid: i32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                Some(p) => p,
                None => continue,
            };
            let comm = match std::fs::read_to_string(entry.path().join("comm")) {
                Ok(c) => c.trim().to_string(),
                Err(_) => continue,
            };
            if comms.iter().any(|c| *c == comm) {
                self.tracked_pids.insert(pid);
            }
        }
        Ok(())
    }

    pub fn enable_tracing(&self) -> Result<()> {
        self.fs.set_tracing_on(true)
    }

    pub fn disable_tracing(&self) -> Result<()> {
        self.fs.set_tracing_on(false)
    }

    pub fn overrun(&self) -> Result<u64> {
        self.fs.overrun()
    }

    /// Drains every per-CPU reader, merges the result in timestamp
    /// order, and scores it. The second element of the return value is
    /// the ring buffer's current absolute overrun total — the caller
    /// compares it against the value read before the round to tell by
    /// how much it grew, for the sample-size back-off. Round validity
    /// itself is carried on `RoundOutcome::missed_events`, a distinct,
    /// sticky-per-round signal read straight off each drained
    /// sub-buffer rather than derived from the overrun delta.
    pub fn collect(&mut self) -> Result<(RoundOutcome, u64)> {
        let mut per_cpu_events = Vec::with_capacity(self.readers.len());
        let mut missed_events = false;
        for reader in &mut self.readers {
            let (events, missed) = reader.drain(self.common_type, self.common_pid)?;
            missed_events |= missed;
            per_cpu_events.push(events);
        }
        let mut outcome =
            merge::merge_and_score(&per_cpu_events, &self.tracked_pids, &self.points_by_event_id);
        outcome.missed_events = missed_events;
        let overrun = self.fs.overrun()?;
        Ok((outcome, overrun))
    }

    /// Disables tracing, removes every installed kprobe, then
    /// re-enables tracing so the kernel isn't left mid-shutdown —
    /// the same order the original's SIGINT handler unwound in.
    pub fn teardown(&self) {
        if let Err(e) = self.fs.set_tracing_on(false) {
            log::warn!("disabling tracing during teardown: {e}");
        }
        for point in &self.points {
            self.fs.remove_kprobe(&point.name);
        }
        if let Err(e) = self.fs.set_tracing_on(true) {
            log::warn!("re-enabling tracing during teardown: {e}");
        }
    }
}
