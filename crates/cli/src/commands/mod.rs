// CLI subcommand dispatch.

use clap::Subcommand;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

pub mod doctor;
pub mod run;
pub mod status;

#[derive(Subcommand)]
pub enum Command {
    /// Serve the checkout and reload the server whenever the remote moves
    Run(run::RunArgs),
    /// Fetch (optionally) and classify the checkout against its upstream
    Status(status::StatusArgs),
    /// Check that git, the checkout and the server program are usable
    Doctor(doctor::DoctorArgs),
}

impl Command {
    fn json_requested(&self) -> bool {
        match self {
            Self::Run(_) => false,
            Self::Status(args) => args.json,
            Self::Doctor(args) => args.json,
        }
    }
}

pub fn run(cmd: Command) -> ExitCode {
    let format = OutputFormat::detect(cmd.json_requested());
    let result = match cmd {
        Command::Run(args) => run::run(args),
        Command::Status(args) => status::run(args),
        Command::Doctor(args) => doctor::run(args),
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            output::print_anyhow_error(format, &error);
            ExitCode::from_error(&error)
        }
    }
}
