//! carevisit-field - field-test CLI for visit check-in
//!
//! Replays scripted position traces through a real check-in session, inspects
//! visit targets on the backend, and measures distances the way the check-in
//! gate does.

use clap::{Parser, Subcommand};
use carevisit_core::config::Config;
use carevisit_core::error::exit_codes;
use carevisit_geo::Coordinate;
use carevisit_telemetry::TelemetryConfig;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

mod commands;
mod trace;

/// Field-test CLI for proximity-gated visit check-in
#[derive(Parser)]
#[command(name = "carevisit-field")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    /// Configuration file (defaults to carevisit.toml lookup)
    #[arg(short, long, global = true, env = "CAREVISIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a position trace through a check-in session
    Simulate {
        /// Trace file (TOML)
        trace: PathBuf,

        /// Time given to the session to react after each step, in milliseconds
        #[arg(long, default_value = "25")]
        settle_ms: u64,
    },

    /// Show a visit's check-in target from the backend
    Visit {
        /// Visit id
        id: String,
    },

    /// Distance between two coordinates and whether it passes the check-in gate
    Distance {
        #[arg(allow_negative_numbers = true)]
        from_lat: f64,
        #[arg(allow_negative_numbers = true)]
        from_lng: f64,
        #[arg(allow_negative_numbers = true)]
        to_lat: f64,
        #[arg(allow_negative_numbers = true)]
        to_lng: f64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1));
        }
    };

    let telemetry = TelemetryConfig {
        log_level: if cli.verbose {
            "debug".to_string()
        } else {
            config.schema.telemetry.log_level.clone()
        },
        json: config.schema.telemetry.json,
        show_target: cli.verbose,
    };
    if let Err(e) = carevisit_telemetry::init_with_config(telemetry) {
        eprintln!("{} {}", "Warning:".yellow().bold(), e);
    }

    let checkin = &config.schema.checkin;
    let result = match cli.command {
        Commands::Simulate { trace, settle_ms } => {
            commands::simulate::run(&trace, checkin, Duration::from_millis(settle_ms), &cli.format)
                .await
        }
        Commands::Visit { id } => commands::visit::run(&id, &config, &cli.format)
            .await
            .map(|()| exit_codes::SUCCESS),
        Commands::Distance {
            from_lat,
            from_lng,
            to_lat,
            to_lng,
        } => commands::distance::run(
            Coordinate::new(from_lat, from_lng),
            Coordinate::new(to_lat, to_lng),
            checkin.units,
            &cli.format,
        )
        .map(|()| exit_codes::SUCCESS),
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            let code = e
                .downcast_ref::<carevisit_core::Error>()
                .map_or(exit_codes::FAILURE, carevisit_core::Error::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
