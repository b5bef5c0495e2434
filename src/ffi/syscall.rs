use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::FromRawFd;
use std::path::Path;

use crate::error::{Error, Result};

/// The kernel's scheduling policies, as accepted by `sched_setscheduler`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedPolicy {
    Other,
    Fifo,
    Rr,
}

impl SchedPolicy {
    fn raw(self) -> libc::c_int {
        match self {
            SchedPolicy::Other => libc::SCHED_OTHER,
            SchedPolicy::Fifo => libc::SCHED_FIFO,
            SchedPolicy::Rr => libc::SCHED_RR,
        }
    }

    /// Priority 0 for `SCHED_OTHER`, 1 for the realtime classes —
    /// deliberately minimal so workers don't starve the rest of the
    /// system.
    pub fn default_priority(self) -> i32 {
        match self {
            SchedPolicy::Other => 0,
            SchedPolicy::Fifo | SchedPolicy::Rr => 1,
        }
    }
}

/// Returns the calling thread's kernel thread id (`gettid(2)`), used to
/// register a worker's tid with the tracer.
pub fn gettid() -> i32 {
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// The kernel's page size, used to size the per-CPU ring-buffer
/// scratch reads (`trace_pipe_raw` hands back whole pages).
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Sets the scheduling policy and priority of the calling thread.
pub fn set_scheduler(policy: SchedPolicy, priority: i32) -> Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let rc = unsafe { libc::sched_setscheduler(0, policy.raw(), &param) };
    if rc != 0 {
        return Err(Error::system("sched_setscheduler", io::Error::last_os_error()));
    }
    Ok(())
}

/// Opens a file read-only and non-blocking, for the per-CPU
/// `trace_pipe_raw` files: a blocking read would stall the merge loop
/// past the end of a round's data.
pub fn open_nonblocking(path: &Path) -> Result<File> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|e| {
        Error::system(
            format!("opening {}", path.display()),
            io::Error::new(io::ErrorKind::InvalidInput, e),
        )
    })?;
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_NONBLOCK) };
    if fd < 0 {
        return Err(Error::system(
            format!("opening {}", path.display()),
            io::Error::last_os_error(),
        ));
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Reads from a non-blocking file descriptor into `buf`.
///
/// Returns `Ok(None)` on EOF or EAGAIN/EWOULDBLOCK ("no more events to
/// read right now"), `Ok(Some(n))` for a successful read of `n` bytes.
pub fn read_nonblocking(file: &File, buf: &mut [u8]) -> Result<Option<usize>> {
    use std::os::fd::AsRawFd;

    let fd = file.as_raw_fd();
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
    if n > 0 {
        Ok(Some(n as usize))
    } else if n == 0 {
        Ok(None)
    } else {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Ok(None),
            _ => Err(Error::system("reading trace_pipe_raw", err)),
        }
    }
}
