//! mdcath-holdout CLI binary

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::process::ExitCode;

fn main() -> ExitCode {
    mdcath_holdout::cli::run()
}
