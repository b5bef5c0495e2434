//! Command-line surface a caller's `main` wires directly to
//! [`crate::controller::experiment_loop`]/[`crate::controller::notrace_loop`].
//! Not part of the library's core — a thin, optional layer, the same
//! way the original's `k_race_parse_options` sat in `main.c` rather
//! than the library proper.

use std::path::PathBuf;

use clap::Parser;

use crate::error::{Error, Result};

#[derive(Parser, Debug)]
#[command(about = "Hunt for kernel race conditions by staggering worker offsets")]
pub struct Options {
    /// Skip tracing entirely; use the random sampler and hammer
    /// offsets forever. Incompatible with -e/-o.
    #[arg(short = 'n', long = "no-trace")]
    pub no_trace: bool,

    /// Probability of picking a uniformly random bucket instead of one
    /// of the current top 10, in [0, 1].
    #[arg(short = 'e', long = "explore-probability", default_value_t = 0.1)]
    pub explore_probability: f64,

    /// CSV output path.
    #[arg(short = 'o', long = "out-file", default_value = "out.csv")]
    pub out_file: PathBuf,

    /// JSON race-point/scheduling configuration.
    #[arg(long = "config-file", default_value = "config.json")]
    pub config_file: PathBuf,
}

impl Options {
    /// Parses `argv` and applies the cross-flag validation the
    /// original enforced in `k_race_parse_options`: `-e`/`-o` do
    /// nothing under `-n`, so both are rejected together with it.
    pub fn parse_and_validate() -> Result<Options> {
        let opts = Options::parse();
        opts.validate()?;
        Ok(opts)
    }

    fn validate(&self) -> Result<()> {
        if self.no_trace {
            if (self.explore_probability - 0.1).abs() > f64::EPSILON {
                return Err(Error::config(
                    "--explore-probability does nothing with --no-trace",
                ));
            }
            if self.out_file != PathBuf::from("out.csv") {
                return Err(Error::config(
                    "--out-file and --no-trace both given, but there is no output with --no-trace",
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.explore_probability) {
            return Err(Error::config("--explore-probability must be in [0, 1]"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn opts(args: &[&str]) -> Result<Options> {
        let mut argv = vec!["k-race"];
        argv.extend_from_slice(args);
        let parsed = Options::try_parse_from(argv).map_err(|e| Error::config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    #[test]
    fn defaults_are_tracing_on_with_standard_paths() {
        let o = opts(&[]).unwrap();
        assert!(!o.no_trace);
        assert_eq!(o.explore_probability, 0.1);
        assert_eq!(o.out_file, PathBuf::from("out.csv"));
        assert_eq!(o.config_file, PathBuf::from("config.json"));
    }

    #[test]
    fn explore_probability_with_no_trace_is_rejected() {
        assert!(opts(&["-n", "-e", "0.5"]).is_err());
    }

    #[test]
    fn out_file_with_no_trace_is_rejected() {
        assert!(opts(&["-n", "-o", "custom.csv"]).is_err());
    }

    #[test]
    fn explore_probability_out_of_range_is_rejected() {
        assert!(opts(&["-e", "1.5"]).is_err());
    }

    #[test]
    fn no_trace_alone_is_accepted() {
        assert!(opts(&["-n"]).is_ok());
    }
}
