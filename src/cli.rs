//! Command-line surface.
//!
//! Thin collaborator: parses flags and positionals, hands everything to the
//! command modules. All cluster semantics live elsewhere.

use clap::{Parser, Subcommand};

/// Cluster management tool for sharded Valkey deployments.
#[derive(Parser, Debug)]
#[command(name = "valkeyctl")]
#[command(version, about = "Valkey cluster management CLI", long_about = None)]
pub struct Cli {
    /// Username for ACL authentication (optional).
    #[arg(short = 'u', long = "user", global = true)]
    pub user: Option<String>,

    /// Password (required for all commands touching the cluster).
    #[arg(short = 'p', long = "password", global = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bootstrap a cluster from not-yet-clustered nodes.
    Create {
        /// Node addresses (host:port), at least three.
        #[arg(required = true, num_args = 3..)]
        nodes: Vec<String>,

        /// Replicas per primary.
        #[arg(long, default_value_t = 0)]
        replicas: u32,
    },

    /// Join a new node to an existing cluster.
    AddNode {
        /// Address of the node to add.
        new_node: String,

        /// Address of any current cluster member.
        existing_node: String,

        /// Make the new node a replica of this primary.
        #[arg(long = "master-id")]
        master_id: Option<String>,
    },

    /// Evict a node, draining its slots first if it is a primary.
    DelNode {
        /// Address of any current cluster member.
        cluster_node: String,

        /// Id of the node to remove.
        node_id: String,
    },

    /// Move slots between two primaries with live data migration.
    Reshard {
        /// Address of any current cluster member.
        cluster_node: String,

        /// Source primary node id.
        #[arg(long)]
        from: String,

        /// Target primary node id.
        #[arg(long)]
        to: String,

        /// Number of slots to move.
        #[arg(long)]
        slots: u32,

        /// Keys fetched per migration round.
        #[arg(long, default_value_t = 10)]
        pipeline: usize,
    },

    /// Even out slot distribution across primaries.
    Rebalance {
        /// Address of any current cluster member.
        cluster_node: String,

        /// Print the plan without executing it.
        #[arg(long = "dry-run")]
        dry_run: bool,

        /// Imbalance percentage below which nothing is done.
        #[arg(long, default_value_t = 5)]
        threshold: u32,

        /// Keys fetched per migration round.
        #[arg(long, default_value_t = 10)]
        pipeline: usize,
    },

    /// Bulk-load deterministic test keys across the cluster.
    PopulateTestData {
        /// Address of any current cluster member.
        cluster_node: String,

        /// Number of keys to write (max 10,000,000).
        #[arg(long = "num-keys", default_value_t = 1000)]
        num_keys: u64,
    },

    /// Audit cluster health and topology.
    Check {
        /// Address of any current cluster member.
        cluster_node: String,

        /// Show full node details (ids, flags, epochs).
        #[arg(short, long)]
        verbose: bool,

        /// Dump the raw cluster view payload.
        #[arg(long)]
        raw: bool,

        /// Count keys in every slot instead of sampling.
        #[arg(long)]
        dbsize: bool,
    },

    /// Show the resolved configuration.
    Config,

    /// Show version information.
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_with_replicas() {
        let cli = Cli::try_parse_from([
            "valkeyctl",
            "-p",
            "pw",
            "create",
            "--replicas",
            "1",
            "a:7001",
            "b:7002",
            "c:7003",
            "d:7004",
            "e:7005",
            "f:7006",
        ])
        .unwrap();
        assert_eq!(cli.password.as_deref(), Some("pw"));
        match cli.command {
            Command::Create { nodes, replicas } => {
                assert_eq!(nodes.len(), 6);
                assert_eq!(replicas, 1);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn create_requires_three_nodes() {
        assert!(Cli::try_parse_from(["valkeyctl", "create", "a:1", "b:2"]).is_err());
    }

    #[test]
    fn parses_reshard_flags() {
        let cli = Cli::try_parse_from([
            "valkeyctl",
            "reshard",
            "localhost:7001",
            "--from",
            "src",
            "--to",
            "dst",
            "--slots",
            "1000",
        ])
        .unwrap();
        match cli.command {
            Command::Reshard {
                from,
                to,
                slots,
                pipeline,
                ..
            } => {
                assert_eq!(from, "src");
                assert_eq!(to, "dst");
                assert_eq!(slots, 1000);
                assert_eq!(pipeline, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn populate_uses_kebab_case_name() {
        let cli = Cli::try_parse_from([
            "valkeyctl",
            "populate-test-data",
            "localhost:7001",
            "--num-keys",
            "5000",
        ])
        .unwrap();
        match cli.command {
            Command::PopulateTestData { num_keys, .. } => assert_eq!(num_keys, 5000),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["valkeyctl", "check", "localhost:7001", "-p", "pw"]).unwrap();
        assert_eq!(cli.password.as_deref(), Some("pw"));
    }
}
