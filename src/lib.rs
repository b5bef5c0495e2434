//! A kernel race-condition hunter: given two or more probe closures,
//! each meant to drive the kernel into a code path touching some
//! shared resource, this crate runs them in parallel from
//! separately-scheduled worker threads while systematically varying
//! the offset between their entries, and uses ftrace kprobes to score
//! how often a configured trigger site fires while an opener site is
//! still open in another task.
//!
//! ## Example
//!
//! ```no_run
//! use k_race::config::Config;
//! use k_race::controller;
//! use k_race::harness::Callbacks;
//! use k_race::tracer;
//!
//! let config = Config::from_file("config.json", 2).unwrap();
//! let workers: Vec<Box<dyn k_race::harness::RaceWorker>> = vec![
//!     Box::new(|| { /* drive target A */ Ok(()) }),
//!     Box::new(|| { /* drive target B */ Ok(()) }),
//! ];
//! let sigint = tracer::install_sigint_handler().unwrap();
//! controller::experiment_loop(
//!     config,
//!     workers,
//!     Callbacks::default(),
//!     0.1,
//!     std::path::Path::new("out.csv"),
//!     sigint,
//! )
//! .unwrap();
//! ```
//!
//! ## Kernel compatibility
//!
//! Requires a Linux kernel with tracefs mounted (`/sys/kernel/tracing`
//! or the legacy `/sys/kernel/debug/tracing`) and enough privilege to
//! write its control files — typically root or `CAP_SYS_ADMIN`.

pub mod cli;
pub mod config;
pub mod controller;
mod error;
mod ffi;
pub mod harness;
pub mod sampler;
pub mod tracer;

pub use error::{Error, Result};
