//! # CLI Interface
//!
//! Defines the command-line argument structure for `tessera-node` using
//! `clap` derive. Supports three subcommands: `run`, `status`, and
//! `version`.

use clap::{Parser, Subcommand};

/// Tessera registry node.
///
/// Hosts an institution's identity and credential registry, serving the
/// REST/WebSocket API and exposing Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "tessera-node",
    about = "Tessera registry node",
    version,
    propagate_version = true
)]
pub struct TesseraNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the tessera-node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the registry node.
    Run(RunArgs),
    /// Query the status of a running node via its REST endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Principal that bootstraps the institution: registry owner and
    /// first administrator.
    #[arg(long, env = "TESSERA_ADMIN")]
    pub admin: String,

    /// Human-readable institution name, reported in `/status`.
    #[arg(long, env = "TESSERA_INSTITUTION", default_value = "devnet-campus")]
    pub institution: String,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "TESSERA_RPC_PORT", default_value_t = 8791)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TESSERA_METRICS_PORT", default_value_t = 8792)]
    pub metrics_port: u16,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "TESSERA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// REST endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:8791")]
    pub rpc_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        TesseraNodeCli::command().debug_assert();
    }
}
