use std::io;
use std::mem::MaybeUninit;

use crate::error::{Error, Result};

/// A CPU affinity mask, backed by `libc::cpu_set_t`.
///
/// Default (empty) mask means "no CPUs set"; [`CpuSet::inherited`] reads
/// the calling thread's current mask, which is what a worker uses when
/// its config omits `cpus` (spec: "omitted or empty -> inherit parent's
/// affinity").
#[derive(Clone, Copy)]
pub struct CpuSet(libc::cpu_set_t);

impl CpuSet {
    pub fn empty() -> Self {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        unsafe {
            libc::CPU_ZERO(set.as_mut_ptr());
            CpuSet(set.assume_init())
        }
    }

    /// Reads the affinity mask of the calling thread.
    pub fn inherited() -> Result<Self> {
        let mut set = Self::empty();
        let rc = unsafe {
            libc::sched_getaffinity(0, size_of::<libc::cpu_set_t>(), &mut set.0 as *mut _)
        };
        if rc != 0 {
            return Err(Error::system("sched_getaffinity", io::Error::last_os_error()));
        }
        Ok(set)
    }

    pub fn insert(&mut self, cpu: usize) {
        unsafe { libc::CPU_SET(cpu, &mut self.0) };
    }

    pub fn contains(&self, cpu: usize) -> bool {
        unsafe { libc::CPU_ISSET(cpu, &self.0) }
    }

    pub fn count(&self) -> usize {
        unsafe { libc::CPU_COUNT(&self.0) as usize }
    }

    /// Applies this mask to the calling thread.
    pub fn apply_to_current_thread(&self) -> Result<()> {
        let rc =
            unsafe { libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &self.0 as *const _) };
        if rc != 0 {
            return Err(Error::system("sched_setaffinity", io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Union with another mask (used to compute the set of CPUs the
    /// tracer needs a per-CPU reader for: the union of every worker's
    /// affinity).
    pub fn union_with(&mut self, other: &CpuSet) {
        for cpu in 0..libc::CPU_SETSIZE as usize {
            if other.contains(cpu) {
                self.insert(cpu);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..libc::CPU_SETSIZE as usize).filter(move |&cpu| self.contains(cpu))
    }
}

impl Default for CpuSet {
    fn default() -> Self {
        Self::empty()
    }
}
