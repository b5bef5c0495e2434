use std::io;

use thiserror::Error;

/// Crate-wide error type.
///
/// Every fallible boundary in this crate (config parsing, thread/scheduler
/// setup, tracefs control, sampler arithmetic, user callbacks) returns one
/// of these variants rather than a bare [`io::Error`], so callers can
/// distinguish "your config is wrong" from "the kernel refused this" from
/// "your own callback returned an error".
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or invalid configuration: missing fields, wrong JSON
    /// types, unknown scheduler policy, out-of-range CPU index, a probe
    /// description that's too long.
    #[error("config error: {0}")]
    Config(String),

    /// A syscall or file operation against the OS or the tracefs control
    /// surface failed.
    #[error("{context}: {source}")]
    System {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The kprobe/ring-buffer tracer could not be set up or torn down.
    #[error("tracer error: {0}")]
    Trace(String),

    /// The offset sampler hit an arithmetic condition it can't recover
    /// from (e.g. a bucket-volume overflow).
    #[error("sampler error: {0}")]
    Sampler(String),

    /// A user-supplied target or pre/post callback returned a nonzero
    /// status.
    #[error("callback returned an error: {0}")]
    Callback(String),
}

impl Error {
    pub fn system(context: impl Into<String>, source: io::Error) -> Self {
        Error::System {
            context: context.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn trace(msg: impl Into<String>) -> Self {
        Error::Trace(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
