//! `config`: show the resolved configuration with secrets masked.

use crate::error::Result;
use crate::settings::{
    Settings, ENV_COMMAND_TIMEOUT, ENV_CONNECT_TIMEOUT, ENV_DEBUG, ENV_MAX_RETRIES, ENV_PASSWORD,
    ENV_POOL_SIZE, ENV_USER,
};

pub fn run(settings: &Settings) -> Result<()> {
    println!("valkeyctl configuration");
    println!("(CLI flags take precedence over environment variables)");
    println!();
    for line in settings.summary().lines() {
        println!("  {}", line);
    }

    println!();
    println!("environment variables (all optional):");
    println!("  {:32} username", ENV_USER);
    println!("  {:32} password", ENV_PASSWORD);
    println!("  {:32} connect timeout (e.g. 10s)", ENV_CONNECT_TIMEOUT);
    println!("  {:32} command timeout (e.g. 60s)", ENV_COMMAND_TIMEOUT);
    println!("  {:32} retry budget for key migration", ENV_MAX_RETRIES);
    println!("  {:32} bulk-loader connection pool size", ENV_POOL_SIZE);
    println!("  {:32} verbose diagnostics (true/1)", ENV_DEBUG);

    Ok(())
}
