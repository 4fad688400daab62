use clap::{Parser, Subcommand};

mod commands;
use commands::{handle_check, handle_config_put, handle_gen, handle_ready_put, handle_secret_put};

#[derive(Parser)]
#[command(name = "chaingate-cli")]
#[command(about = "Admin helper for the Chaingate RPC gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Gateway root URL (e.g. https://gateway.example)
    #[arg(long, default_value = "http://127.0.0.1:8090")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an access/secret key pair locally
    Gen,

    /// Upsert a secret key via the admin API
    SecretPut {
        #[arg(long)]
        access_key: String,
        #[arg(long)]
        secret_key: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        service: String,
        /// Origin regex; empty allows any origin
        #[arg(long, default_value = "")]
        allow_origins: String,
        /// Per-tenant route rules as JSON
        #[arg(long, default_value = "")]
        route_rules: String,
    },

    /// Upsert a config record via the admin API
    ConfigPut {
        #[arg(long)]
        module: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
    },

    /// Upsert a ready upstream via the admin API
    ReadyPut {
        #[arg(long)]
        chain_id: String,
        #[arg(long)]
        source: String,
        /// Comma-joined endpoint URLs
        #[arg(long)]
        rpc: String,
        #[arg(long, default_value = "jsonrpc")]
        protocol: String,
    },

    /// Fetch the redacted ready URL list for a chain
    Check {
        #[arg(long)]
        chain_id: String,
        #[arg(long)]
        access_key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gen => handle_gen(),
        Commands::SecretPut { access_key, secret_key, group, service, allow_origins, route_rules } => {
            handle_secret_put(
                &cli.url,
                access_key,
                secret_key,
                group,
                service,
                allow_origins,
                route_rules,
            )
            .await
        }
        Commands::ConfigPut { module, key, value } => {
            handle_config_put(&cli.url, module, key, value).await
        }
        Commands::ReadyPut { chain_id, source, rpc, protocol } => {
            handle_ready_put(&cli.url, chain_id, source, rpc, &protocol).await
        }
        Commands::Check { chain_id, access_key } => {
            handle_check(&cli.url, &chain_id, &access_key).await
        }
    }
}
