use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(name = "pgreflect", version, about = "Postgres reflection proxy")]
struct Cli {
    /// Configuration file.
    #[arg(
        long,
        short,
        global = true,
        env = "PGREFLECT_CONFIG",
        default_value = "pgreflect.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the proxy.
    Serve(ServeArgs),

    /// Show how a query would be scoped for a tenant.
    Explain {
        /// Tenant id, as a client would send it in `database`.
        #[arg(long)]
        tenant: String,

        /// SQL text to scope.
        sql: String,

        /// Print the result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Validate the configuration and list tenants and rules.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Serve(args) => commands::serve::run(&cli.config, &args).await?,
        Command::Explain { tenant, sql, json } => {
            commands::explain::run(&cli.config, &tenant, &sql, json).await?
        }
        Command::Check => commands::check::run(&cli.config)?,
    }

    Ok(())
}
