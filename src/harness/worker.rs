use std::sync::mpsc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::Shared;
use crate::config::WorkerSchedConfig;
use crate::ffi::syscall;

/// One race target: the user-supplied function to race, run repeatedly
/// by its own worker thread. Implemented for any `FnMut() -> Result<()>`
/// closure, so callers don't need to name a type for simple targets.
pub trait RaceWorker: Send + 'static {
    fn run(&mut self) -> crate::error::Result<()>;
}

impl<F: FnMut() -> crate::error::Result<()> + Send + 'static> RaceWorker for F {
    fn run(&mut self) -> crate::error::Result<()> {
        self()
    }
}

impl RaceWorker for Box<dyn RaceWorker> {
    fn run(&mut self) -> crate::error::Result<()> {
        (**self).run()
    }
}

/// Hooks run once per round — not once per worker — after every
/// worker's pre-round barrier wait, and after every worker's post-round
/// arrival, respectively.
#[derive(Default)]
pub struct Callbacks {
    pub pre: Option<Box<dyn Fn() -> crate::error::Result<()> + Send + Sync>>,
    pub post: Option<Box<dyn Fn() -> crate::error::Result<()> + Send + Sync>>,
}

/// Keeps the 3 largest values seen, used to pick the third-largest of
/// 100 timed samples as a target's baseline duration — discards the
/// top 2 as likely scheduling-noise outliers, the way the original
/// tool's `measure_duration` does.
fn insert_top3(top3: &mut [i64; 3], d: i64) {
    if d > top3[0] {
        top3[2] = top3[1];
        top3[1] = top3[0];
        top3[0] = d;
    } else if d > top3[1] {
        top3[2] = top3[1];
        top3[1] = d;
    } else if d > top3[2] {
        top3[2] = d;
    }
}

/// Applies the worker's CPU affinity and scheduler policy to the
/// calling (worker) thread, returning its tid once both succeed. An
/// empty affinity mask means "inherit the parent's", so the
/// `sched_setaffinity` call is skipped rather than attempted with a
/// mask the kernel would reject.
fn apply_sched(sched: &WorkerSchedConfig) -> crate::error::Result<i32> {
    if sched.cpus.count() > 0 {
        sched.cpus.apply_to_current_thread()?;
    }
    syscall::set_scheduler(sched.policy, sched.priority)?;
    Ok(syscall::gettid())
}

pub(super) fn spawn_worker<W: RaceWorker>(
    idx: usize,
    shared: Arc<Shared>,
    mut worker: W,
    sched: WorkerSchedConfig,
    tid_tx: mpsc::Sender<(usize, crate::error::Result<i32>)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let tid = match apply_sched(&sched) {
            Ok(tid) => tid,
            Err(e) => {
                log::error!("worker {idx}: setting up scheduler/affinity: {e}");
                let _ = tid_tx.send((idx, Err(e)));
                return;
            }
        };
        let _ = tid_tx.send((idx, Ok(tid)));

        if !shared.wait_start() {
            return;
        }

        // Rounds are barrier-synchronized: once a worker has entered
        // `pre_round`, every other worker must also call `pre_round`
        // and `post_round` for this sample, or the barrier deadlocks.
        // A disarmed worker therefore stays in lockstep for the rest
        // of the in-flight round, just skipping the target call, the
        // same "finish harmlessly" guarantee the original got from
        // swapping every worker's function pointer for a no-op.
        let mut top3 = [i64::MIN; 3];
        for _ in 0..100 {
            shared.pre_round();
            let elapsed = if shared.is_armed() {
                let start = Instant::now();
                if let Err(e) = worker.run() {
                    log::error!("worker {idx}: target returned an error: {e}");
                    shared.fail(e);
                }
                start.elapsed().as_nanos() as i64
            } else {
                0
            };
            shared.post_round();
            insert_top3(&mut top3, elapsed);
        }
        shared.set_baseline(idx, top3[2]);
        shared.workers_finished();

        loop {
            if !shared.wait_start() {
                return;
            }
            let samples = shared.samples.load(Ordering::Relaxed);
            let sleep = shared.sleep_duration(idx);
            for _ in 0..samples {
                shared.pre_round();
                if shared.is_armed() {
                    thread::sleep(sleep);
                    if let Err(e) = worker.run() {
                        log::error!("worker {idx}: target returned an error: {e}");
                        shared.fail(e);
                    }
                }
                shared.post_round();
            }
            shared.workers_finished();
        }
    })
}
