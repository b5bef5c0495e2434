//! Races a rename of a file being written against a concurrent write
//! to it, against a journal-less ext4 mount — the original motivating
//! bug for this tool's C ancestor. Run with an ext4 filesystem mounted
//! at `/mnt` with `data=writeback,barrier=0`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::{Arc, Mutex};

use k_race::config::Config;
use k_race::harness::{Callbacks, RaceWorker};
use k_race::{controller, tracer, Error};

const MOUNT: &str = "/mnt";

fn main() {
    env_logger::init();

    let opts = k_race::cli::Options::parse_and_validate().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    if let Err(e) = fs::create_dir_all(format!("{MOUNT}/dir2")) {
        eprintln!("mkdir {MOUNT}/dir2: {e}");
        std::process::exit(1);
    }

    let config = Config::from_file(&opts.config_file, 2).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let fd: Arc<Mutex<Option<File>>> = Arc::new(Mutex::new(None));

    let pre_fd = Arc::clone(&fd);
    let pre = move || -> k_race::Result<()> {
        let dir1 = format!("{MOUNT}/dir1");
        if let Err(e) = fs::create_dir(&dir1) {
            if e.kind() != std::io::ErrorKind::AlreadyExists {
                return Err(Error::Callback(format!("mkdir {dir1}: {e}")));
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .custom_flags(libc::O_SYNC)
            .open(format!("{dir1}/file"))
            .map_err(|e| Error::Callback(format!("open {dir1}/file: {e}")))?;
        *pre_fd.lock().unwrap() = Some(file);
        Ok(())
    };

    let post_fd = Arc::clone(&fd);
    let post = move || -> k_race::Result<()> {
        post_fd.lock().unwrap().take();
        Ok(())
    };

    let write_fd = Arc::clone(&fd);
    let do_write: Box<dyn RaceWorker> = Box::new(move || {
        if let Some(f) = write_fd.lock().unwrap().as_mut() {
            let _ = f.write_all(b"X");
        }
        Ok(())
    });

    let do_rename: Box<dyn RaceWorker> = Box::new(|| {
        let _ = fs::rename(format!("{MOUNT}/dir1/file"), format!("{MOUNT}/dir2/file"));
        let _ = fs::remove_dir(format!("{MOUNT}/dir1"));
        Ok(())
    });

    let callbacks = Callbacks {
        pre: Some(Box::new(pre)),
        post: Some(Box::new(post)),
    };

    let sigint = tracer::install_sigint_handler().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let workers: Vec<Box<dyn RaceWorker>> = vec![do_rename, do_write];

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
