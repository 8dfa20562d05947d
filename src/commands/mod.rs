//! Command entrypoints, one module per subcommand.
//!
//! Each entrypoint validates its inputs, builds a connection pool for the
//! invocation, runs the flow, and tears the pool down before returning.

pub mod add_node;
pub mod check;
pub mod config_cmd;
pub mod create;
pub mod del_node;
pub mod populate;
pub mod rebalance;
pub mod reshard;
