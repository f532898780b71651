// crates/phi-gate-server/src/main.rs
// ============================================================================
// Module: PHI Gate Server Entry Point
// Description: Process bootstrap for the orchestration backbone.
// Purpose: Load configuration, assemble the application, and serve.
// Dependencies: phi-gate-config, phi-gate-server, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! The binary takes one argument, the configuration file path, validates it,
//! assembles the application, and serves until interrupted. Operational
//! logging goes through `tracing` with the standard `RUST_LOG` environment
//! filter; clinical actions are recorded in the Audit Log, never in logs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;

use phi_gate_config::GateConfig;
use phi_gate_server::Application;
use tracing::error;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Default configuration path when no argument is given.
const DEFAULT_CONFIG_PATH: &str = "/etc/phi-gate/config.toml";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info")
        }))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = match GateConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %config_path.display(), %err, "configuration rejected");
            return ExitCode::FAILURE;
        }
    };

    let application = match Application::build(&config) {
        Ok(application) => application,
        Err(err) => {
            error!(%err, "bootstrap failed");
            return ExitCode::FAILURE;
        }
    };

    match application.serve().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "server terminated abnormally");
            ExitCode::FAILURE
        }
    }
}
