use std::process::ExitCode;

use clap::Parser;
use houdini_adaptor::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    ExitCode::from(houdini_adaptor::cli::run(cli))
}
