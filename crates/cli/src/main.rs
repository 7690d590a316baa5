// sitewatch CLI entry point.

use clap::Parser;

mod commands;
mod exit_code;
mod output;
mod telemetry;

#[derive(Parser)]
#[command(
    name = "sitewatch",
    version,
    about = "Serve documentation from a git checkout and reload it when the remote moves"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    commands::run(cli.command).into()
}
