//! Races two readers of `/dev/vchiq`'s completion queue against each
//! other, checking that each sees every instance's completion exactly
//! once. Linux/Raspberry Pi only — requires the `vchiq` staging driver.

use std::ffi::c_void;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::{Arc, Mutex};

use k_race::config::Config;
use k_race::harness::{Callbacks, RaceWorker};
use k_race::{controller, tracer, Error};

const BUF_SIZE: usize = 200 * 1024;
const NUM_INSTANCES: usize = 200;
const VCHIQ_DEVICE: &str = "/dev/vchiq";

#[repr(C)]
struct VchiqServiceParams {
    fourcc: i32,
    callback: usize,
    userdata: *mut c_void,
    version: i16,
    version_min: i16,
}

#[repr(C)]
struct VchiqCreateService {
    params: VchiqServiceParams,
    is_open: i32,
    is_vchi: i32,
    handle: u32,
}

/// Reimplements the kernel's `_IOWR(type, nr, size)` request-code
/// encoding (no binding for it exists outside this driver's own
/// headers).
fn iowr(ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    const DIR_READ_WRITE: u64 = 3;
    ((DIR_READ_WRITE << 30) | ((ty as u64) << 8) | (nr as u64) | ((size as u64) << 16)) as libc::c_ulong
}

fn create_instances() -> std::io::Result<()> {
    for i in 0..NUM_INSTANCES {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_RDONLY)
            .open(VCHIQ_DEVICE)?;
        let mut service = VchiqCreateService {
            params: VchiqServiceParams {
                fourcc: i as i32,
                callback: 0,
                userdata: std::ptr::null_mut(),
                version: 0,
                version_min: 0,
            },
            is_open: 0,
            is_vchi: 0,
            handle: 0,
        };
        let request = iowr(0xc4, 2, std::mem::size_of::<VchiqCreateService>());
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), request, &mut service as *mut _) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // Deliberately leaked: each instance's fd must stay open for
        // the service to remain registered for the race itself.
        std::mem::forget(file);
    }
    Ok(())
}

struct WorkerArg {
    fd: Option<File>,
    buf: Vec<u8>,
}

fn num_instances(buf: &[u8]) -> usize {
    let text = String::from_utf8_lossy(buf);
    text.matches("completions").count()
}

fn main() {
    env_logger::init();

    let opts = k_race::cli::Options::parse_and_validate().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    if let Err(e) = create_instances() {
        eprintln!("setting up vchiq instances: {e}");
        std::process::exit(1);
    }

    let config = Config::from_file(&opts.config_file, 2).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let args: Vec<Arc<Mutex<WorkerArg>>> = (0..2)
        .map(|_| {
            Arc::new(Mutex::new(WorkerArg {
                fd: None,
                buf: vec![0u8; BUF_SIZE],
            }))
        })
        .collect();

    let pre_args = args.clone();
    let pre = move || -> k_race::Result<()> {
        for arg in &pre_args {
            let file = std::fs::OpenOptions::new()
                .read(true)
                .open(VCHIQ_DEVICE)
                .map_err(|e| Error::Callback(format!("open {VCHIQ_DEVICE}: {e}")))?;
            arg.lock().unwrap().fd = Some(file);
        }
        Ok(())
    };

    let post_args = args.clone();
    let post = move || -> k_race::Result<()> {
        for arg in &post_args {
            let mut arg = arg.lock().unwrap();
            let found = num_instances(&arg.buf);
            if found != NUM_INSTANCES {
                return Err(Error::Callback(format!(
                    "instance count mismatch: saw {found}, expected {NUM_INSTANCES}"
                )));
            }
            arg.fd = None;
        }
        Ok(())
    };

    let workers: Vec<Box<dyn RaceWorker>> = args
        .iter()
        .cloned()
        .map(|arg| -> Box<dyn RaceWorker> {
            Box::new(move || {
                use std::io::Read;
                let mut arg = arg.lock().unwrap();
                let WorkerArg { fd, buf } = &mut *arg;
                let n = fd
                    .as_mut()
                    .and_then(|f| f.read(buf).ok())
                    .unwrap_or(0);
                if n == 0 {
                    return Err(Error::Callback("vchiq read returned no data".into()));
                }
                Ok(())
            })
        })
        .collect();

    let callbacks = Callbacks {
        pre: Some(Box::new(pre)),
        post: Some(Box::new(post)),
    };

    let sigint = tracer::install_sigint_handler().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let result = if opts.no_trace {
        controller::notrace_loop(config, workers, callbacks, sigint)
    } else {
        controller::experiment_loop(
            config,
            workers,
            callbacks,
            opts.explore_probability,
            &opts.out_file,
            sigint,
        )
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
