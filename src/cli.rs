use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::STORPLAN_VERSION;

#[derive(Parser, Debug)]
#[clap(version = STORPLAN_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Also write every log record, as JSON lines, to this file
    #[arg(global = true, long)]
    pub log_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search for a layout where every planned device fits
    Propose {
        /// Request file with the devicegraph, planned devices and settings
        #[clap(index = 1)]
        request: PathBuf,

        /// Path to save the resulting devicegraph and devices map
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Path to save an eventual fatal error
        #[clap(short, long)]
        error: Option<PathBuf>,
    },

    /// Create the planned devices as given, reporting what could not be
    /// created as issues
    Populate {
        /// Request file with the devicegraph, planned devices and disk names
        #[clap(index = 1)]
        request: PathBuf,

        /// Path to save the resulting devicegraph, devices map and issues
        #[clap(short, long)]
        output: Option<PathBuf>,

        /// Path to save an eventual fatal error
        #[clap(short, long)]
        error: Option<PathBuf>,
    },

    /// Validate a request file without running the engine
    Validate {
        #[clap(index = 1)]
        request: PathBuf,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Propose { .. } => "propose",
            Commands::Populate { .. } => "populate",
            Commands::Validate { .. } => "validate",
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::parse_from([
            "storplan",
            "propose",
            "request.yaml",
            "-o",
            "out.yaml",
            "-v",
            "debug",
        ]);
        assert_eq!(cli.verbosity, LevelFilter::Debug);
        assert!(cli.log_file.is_none());
        match cli.command {
            Commands::Propose {
                request,
                output,
                error,
            } => {
                assert_eq!(request, PathBuf::from("request.yaml"));
                assert_eq!(output, Some(PathBuf::from("out.yaml")));
                assert!(error.is_none());
            }
            other => panic!("unexpected command {other}"),
        }

        let cli = Cli::parse_from(["storplan", "--log-file", "run.log", "validate", "r.yaml"]);
        assert_eq!(cli.command.to_string(), "validate");
        assert_eq!(cli.verbosity, LevelFilter::Info);
        assert_eq!(cli.log_file, Some(PathBuf::from("run.log")));
    }
}
