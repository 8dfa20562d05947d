//! valkeyctl - cluster management CLI for sharded Valkey deployments.
//!
//! The entry point resolves configuration (environment, then CLI flags),
//! initializes logging, and dispatches to the command modules. Every
//! command error maps to exit code 1 with a single-line summary on stderr.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use valkeyctl::cli::{Cli, Command};
use valkeyctl::commands;
use valkeyctl::settings::Settings;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    settings.apply_cli(cli.user.clone(), cli.password.clone());

    let default_directive = if settings.debug {
        "valkeyctl=debug"
    } else {
        "valkeyctl=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_directive)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Command::Create { nodes, replicas } => {
            commands::create::run(&settings, &nodes, replicas).await
        }
        Command::AddNode {
            new_node,
            existing_node,
            master_id,
        } => commands::add_node::run(&settings, &new_node, &existing_node, master_id.as_deref())
            .await,
        Command::DelNode {
            cluster_node,
            node_id,
        } => commands::del_node::run(&settings, &cluster_node, &node_id).await,
        Command::Reshard {
            cluster_node,
            from,
            to,
            slots,
            pipeline,
        } => commands::reshard::run(&settings, &cluster_node, &from, &to, slots, pipeline).await,
        Command::Rebalance {
            cluster_node,
            dry_run,
            threshold,
            pipeline,
        } => commands::rebalance::run(&settings, &cluster_node, dry_run, threshold, pipeline).await,
        Command::PopulateTestData {
            cluster_node,
            num_keys,
        } => commands::populate::run(&settings, &cluster_node, num_keys).await,
        Command::Check {
            cluster_node,
            verbose,
            raw,
            dbsize,
        } => commands::check::run(&settings, &cluster_node, verbose, raw, dbsize).await,
        Command::Config => commands::config_cmd::run(&settings),
        Command::Version => {
            println!("valkeyctl {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
