use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Federated SQL executor - run one statement across many databases
#[derive(Parser, Debug, Clone)]
#[command(name = "fedsql", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "FEDSQL_CONFIG", default_value = "fedsql.toml", global = true)]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "FEDSQL_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "FEDSQL_PORT")]
    pub port: Option<u16>,

    /// Secret used to encrypt and decrypt datasource passwords
    #[arg(long, env = "FEDSQL_SECRET_KEY", hide_env_values = true, global = true)]
    pub secret_key: Option<String>,

    /// Number of backend queries allowed to run at once
    #[arg(long, env = "FEDSQL_POOL_SIZE")]
    pub pool_size: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Encrypt a datasource password for storage
    Encrypt { plaintext: String },
    /// Decrypt a stored datasource password
    Decrypt { ciphertext: String },
    /// Print a fresh random secret suitable for `encryption.secret_key`
    GenerateKey,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
