use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Error};
use clap::Parser;
use log::{error, info};

use storplan::{
    calculate,
    cli::{Cli, Commands},
    populate,
    request::{ProposalOutput, ProposalRequest},
    STORPLAN_VERSION,
};
use storplan_api::error::{InternalError, ProposalError, ProposalResultExt, ReportError};

fn propose(request_path: &Path) -> Result<ProposalOutput, ProposalError> {
    let request = ProposalRequest::load(request_path)?;
    let devicegraph = request.devicegraph()?;
    let catalog = request.catalog()?;
    let settings = request.settings(&devicegraph);
    let proposal = calculate(&devicegraph, &catalog, settings, &request.engine)?;
    for adjustment in &proposal.adjustments {
        info!("Settings adjusted: {adjustment:?}");
    }
    Ok(ProposalOutput::from(&proposal))
}

fn populate_request(request_path: &Path) -> Result<ProposalOutput, ProposalError> {
    let request = ProposalRequest::load(request_path)?;
    let devicegraph = request.devicegraph()?;
    let catalog = request.catalog()?;
    let result = populate(&devicegraph, &catalog, &request.disk_names, &request.engine)?;
    for issue in result.issues.iter() {
        info!("Issue: {issue}");
    }
    Ok(ProposalOutput::from(&result))
}

fn validate(request_path: &Path) -> Result<(), ProposalError> {
    let request = ProposalRequest::load(request_path)?;
    let devicegraph = request.devicegraph()?;
    let catalog = request.catalog()?;
    if let Some(settings) = &request.settings {
        settings.validate()?;
    }
    info!(
        "Request is valid: {} device(s), {} planned device(s)",
        devicegraph.device_count(),
        catalog.devices().len()
    );
    Ok(())
}

fn write_output(output: &ProposalOutput, path: Option<&PathBuf>) -> Result<(), ProposalError> {
    let yaml = serde_yaml::to_string(output).structured(InternalError::SerializeOutput)?;
    match path {
        Some(path) => std::fs::write(path, yaml).structured(InternalError::WriteOutput {
            path: path.display().to_string(),
        }),
        None => {
            print!("{yaml}");
            Ok(())
        }
    }
}

fn run_storplan(args: &Cli) -> Result<(), ProposalError> {
    info!("storplan version: {STORPLAN_VERSION}");

    let (request, output, error) = match &args.command {
        Commands::Validate { request } => {
            return validate(request).message("Request validation failed");
        }
        Commands::Propose {
            request,
            output,
            error,
        }
        | Commands::Populate {
            request,
            output,
            error,
        } => (request, output, error),
    };

    let res = match args.command {
        Commands::Propose { .. } => propose(request),
        _ => populate_request(request),
    }
    .and_then(|out| write_output(&out, output.as_ref()));

    // Save the error if requested
    if let (Some(error_path), Err(e)) = (error.as_ref(), &res) {
        if let Err(e2) = std::fs::write(
            error_path,
            serde_yaml::to_string(&e).unwrap_or_default(),
        ) {
            error!("Failed to write error to file: {e2}");
        }
    }

    res.message(format!("Failed to execute '{}' command", args.command))
}

fn setup_logging(args: &Cli) -> Result<(), Error> {
    storplan::logger(args.verbosity, args.log_file.as_deref())?
        .init()
        .context("Logger already registered")
}

fn main() -> ExitCode {
    let args = Cli::parse();

    if let Err(e) = setup_logging(&args) {
        eprintln!("Failed to initialize logging: {e:?}");
        return ExitCode::from(1);
    }

    match run_storplan(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("storplan failed: {e:?}");
            ExitCode::from(2)
        }
    }
}
