//! Barrier-synchronized worker harness: spawns one thread per race
//! target, staggers their start times round after round according to
//! whatever offsets the sampler picks, and runs the user's optional
//! pre/post-round callbacks exactly once per round regardless of how
//! many workers there are.

mod offsets;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

pub use worker::{Callbacks, RaceWorker};

use crate::config::WorkerSchedConfig;
use crate::error::{Error, Result};

struct RunState {
    start: bool,
    finished: usize,
}

struct Shared {
    num_workers: usize,
    barrier: Barrier,
    round_pre: AtomicUsize,
    round_finished: AtomicUsize,
    /// Replaces the original's trick of swapping every worker's target
    /// function pointer for a no-op on shutdown: workers check this
    /// flag at every wait point and on armed == false, unwind out of
    /// their loop instead of being handed a dummy function to keep
    /// calling.
    armed: AtomicBool,
    samples: AtomicU32,
    offsets_ns: Vec<AtomicI64>,
    baselines: Mutex<Vec<i64>>,
    state: Mutex<RunState>,
    cond_start: Condvar,
    cond_end: Condvar,
    error: Mutex<Option<Error>>,
    callbacks: Callbacks,
}

impl Shared {
    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn wait_start(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        while !state.start && self.armed.load(Ordering::Acquire) {
            state = self.cond_start.wait(state).unwrap();
        }
        self.armed.load(Ordering::Acquire)
    }

    fn workers_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.start = false;
        state.finished += 1;
        if state.finished == self.num_workers {
            self.cond_end.notify_one();
        }
    }

    fn pre_round(&self) {
        if self.callbacks.pre.is_some()
            && self.armed.load(Ordering::Acquire)
            && self.round_pre.fetch_add(1, Ordering::Relaxed) + 1 == self.num_workers
        {
            self.round_pre.store(0, Ordering::Relaxed);
            if let Some(cb) = &self.callbacks.pre {
                if let Err(e) = cb() {
                    log::error!("pre-round callback failed: {e}");
                    self.fail(e);
                }
            }
        }
        self.barrier.wait();
    }

    fn post_round(&self) {
        if self.callbacks.post.is_none() || !self.armed.load(Ordering::Acquire) {
            return;
        }
        if self.round_finished.fetch_add(1, Ordering::Relaxed) + 1 < self.num_workers {
            return;
        }
        self.round_finished.store(0, Ordering::Relaxed);
        if let Some(cb) = &self.callbacks.post {
            if let Err(e) = cb() {
                log::error!("post-round callback failed: {e}");
                self.fail(e);
            }
        }
    }

    fn fail(&self, e: Error) {
        *self.error.lock().unwrap() = Some(e);
        self.shutdown();
    }

    fn shutdown(&self) {
        self.armed.store(false, Ordering::Release);
        let mut state = self.state.lock().unwrap();
        state.start = false;
        self.cond_start.notify_all();
        self.cond_end.notify_all();
    }

    fn set_baseline(&self, idx: usize, value: i64) {
        self.baselines.lock().unwrap()[idx] = value;
    }

    fn sleep_duration(&self, idx: usize) -> Duration {
        let nanos = self.offsets_ns[idx].load(Ordering::Relaxed);
        Duration::from_nanos(nanos.max(0) as u64)
    }

    fn run_round(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.start = true;
            state.finished = 0;
        }
        *self.error.lock().unwrap() = None;
        self.cond_start.notify_all();

        let mut state = self.state.lock().unwrap();
        while state.finished < self.num_workers && self.armed.load(Ordering::Acquire) {
            state = self.cond_end.wait(state).unwrap();
        }
        drop(state);

        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        if !self.armed.load(Ordering::Acquire) {
            return Err(Error::Callback("worker harness was shut down mid-round".into()));
        }
        Ok(())
    }
}

/// Owns the spawned worker threads for one experiment and the shared
/// synchronization state they coordinate through.
pub struct Harness {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    tids: Vec<i32>,
}

impl Harness {
    /// Spawns one thread per worker. `workers` and `sched` must be the
    /// same length — one worker, one schedule, per race target.
    pub fn spawn<W: RaceWorker>(
        workers: Vec<W>,
        sched: Vec<WorkerSchedConfig>,
        callbacks: Callbacks,
    ) -> Result<Harness> {
        let num_workers = workers.len();
        if num_workers < 2 {
            return Err(Error::config("must supply at least two race targets"));
        }
        if sched.len() != num_workers {
            return Err(Error::config("one sched entry is required per race target"));
        }

        let shared = Arc::new(Shared {
            num_workers,
            barrier: Barrier::new(num_workers),
            round_pre: AtomicUsize::new(0),
            round_finished: AtomicUsize::new(0),
            armed: AtomicBool::new(true),
            samples: AtomicU32::new(0),
            offsets_ns: (0..num_workers).map(|_| AtomicI64::new(0)).collect(),
            baselines: Mutex::new(vec![0; num_workers]),
            state: Mutex::new(RunState {
                start: false,
                finished: 0,
            }),
            cond_start: Condvar::new(),
            cond_end: Condvar::new(),
            error: Mutex::new(None),
            callbacks,
        });

        let (tid_tx, tid_rx) = mpsc::channel();
        let mut threads = Vec::with_capacity(num_workers);
        for (idx, (w, cfg)) in workers.into_iter().zip(sched).enumerate() {
            threads.push(worker::spawn_worker(idx, Arc::clone(&shared), w, cfg, tid_tx.clone()));
        }
        drop(tid_tx);

        // Every spawned worker sends exactly one setup result before
        // doing anything else, whether or not it went on to enter the
        // round loop — receive precisely `num_workers` of them rather
        // than draining the channel, since a worker that got past
        // setup keeps its sender alive for as long as it keeps running.
        let mut tids = vec![0i32; num_workers];
        let mut setup_error: Option<Error> = None;
        for _ in 0..num_workers {
            let (idx, result) = tid_rx
                .recv()
                .expect("every spawned worker thread reports its setup result");
            match result {
                Ok(tid) => tids[idx] = tid,
                Err(e) => {
                    setup_error.get_or_insert(e);
                }
            }
        }

        // A worker that failed setup never enters the round loop, so
        // any worker that succeeded is parked waiting for the first
        // round's start signal — shut down to release it before
        // joining, per spec.md §4.1 ("Thread-create/scheduler-setup
        // failures abort the experiment before the round loop begins").
        if let Some(e) = setup_error {
            shared.shutdown();
            for t in threads {
                let _ = t.join();
            }
            return Err(e);
        }

        Ok(Harness {
            shared,
            threads,
            tids,
        })
    }

    /// Kernel thread ids of the spawned workers, in target order —
    /// used to tell the tracer which pids' kprobe hits to count.
    pub fn tids(&self) -> &[i32] {
        &self.tids
    }

    /// Runs the fixed 100-iteration, no-offset measurement round every
    /// worker performs once at startup, and returns each worker's
    /// baseline duration (target order).
    pub fn measure_baselines(&self) -> Result<Vec<i64>> {
        self.shared.run_round()?;
        Ok(self.shared.baselines.lock().unwrap().clone())
    }

    /// Sets the per-worker sleep offsets for the next round(s) from the
    /// sampler's `num_workers - 1` raw params.
    pub fn set_offsets(&self, params: &[i64]) {
        let durations = offsets::normalize(params, self.shared.num_workers);
        for (slot, d) in self.shared.offsets_ns.iter().zip(&durations) {
            slot.store(*d, Ordering::Relaxed);
        }
    }

    /// Runs one round of `samples` staggered iterations per worker.
    pub fn run_round(&self, samples: u32) -> Result<()> {
        self.shared.samples.store(samples, Ordering::Relaxed);
        self.shared.run_round()
    }

    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    /// Waits for every worker thread to exit. Call after [`Self::shutdown`].
    pub fn join(self) {
        for t in self.threads {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ffi::syscall::SchedPolicy;
    use crate::ffi::CpuSet;
    use std::sync::atomic::AtomicUsize as Counter;

    fn sched() -> Vec<WorkerSchedConfig> {
        (0..2)
            .map(|_| WorkerSchedConfig {
                policy: SchedPolicy::Other,
                priority: 0,
                cpus: CpuSet::empty(),
            })
            .collect()
    }

    #[test]
    fn measures_baselines_and_runs_rounds() {
        let counter = Arc::new(Counter::new(0));
        let c1 = Arc::clone(&counter);
        let c2 = Arc::clone(&counter);
        let workers: Vec<Box<dyn RaceWorker>> = vec![
            Box::new(move || {
                c1.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
            Box::new(move || {
                c2.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        ];
        let harness = Harness::spawn(workers, sched(), Callbacks::default()).unwrap();
        let baselines = harness.measure_baselines().unwrap();
        assert_eq!(baselines.len(), 2);
        assert_eq!(counter.load(Ordering::Relaxed), 200);

        harness.set_offsets(&[0]);
        harness.run_round(5).unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 210);

        harness.shutdown();
        harness.join();
    }

    #[test]
    fn rejects_too_few_workers() {
        let workers: Vec<Box<dyn RaceWorker>> = vec![Box::new(|| Ok(()))];
        assert!(Harness::spawn(workers, sched()[..1].to_vec(), Callbacks::default()).is_err());
    }

    #[test]
    fn scheduler_setup_failure_aborts_before_the_round_loop() {
        // CPU 1023 is vanishingly unlikely to be online on the test
        // host, so `sched_setaffinity` rejects it — the worker must
        // report that back and `spawn` must fail instead of silently
        // entering the round loop with its requested affinity unset.
        let mut bogus_cpus = CpuSet::empty();
        bogus_cpus.insert(1023);
        let mut scheds = sched();
        scheds[0].cpus = bogus_cpus;

        let workers: Vec<Box<dyn RaceWorker>> = vec![Box::new(|| Ok(())), Box::new(|| Ok(()))];
        assert!(Harness::spawn(workers, scheds, Callbacks::default()).is_err());
    }
}
