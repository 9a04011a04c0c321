//! Celpack - command-line sprite sheet to banked tile data converter

use std::process::ExitCode;

use celpack::cli;

fn main() -> ExitCode {
    cli::run()
}
