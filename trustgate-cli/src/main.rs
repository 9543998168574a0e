mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "trustgate")]
#[command(about = "Verify credentials and delegation chains, producing signed results")]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Verify a request and print the signed result
    Verify {
        /// Request JSON, or an OIDC4VP authorization response with --vp-token
        request: PathBuf,

        /// Verifier configuration
        #[arg(short, long, default_value = "trustgate.toml")]
        config: PathBuf,

        /// Treat the input as a vp_token
        #[arg(long)]
        vp_token: bool,

        /// Policy for --vp-token input
        #[arg(short, long, default_value = "default")]
        policy: String,

        /// Print only the compact token
        #[arg(long)]
        token_only: bool,
    },
    /// Generate an Ed25519 signing key
    Keygen {
        /// Key id
        #[arg(short, long, default_value = "verifier-key-1")]
        kid: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Check a signed result against a JWKS and print it
    DecodeVro {
        /// Compact token, or a file containing one
        token: String,

        /// JWKS file of the verifier
        #[arg(short, long)]
        jwks: PathBuf,
    },
    /// Inspect an anchor ledger
    Anchor {
        #[command(subcommand)]
        action: AnchorAction,
    },
}

#[derive(Subcommand)]
pub enum AnchorAction {
    /// Recompute every record hash
    Verify {
        /// Ledger file
        ledger: PathBuf,
    },
    /// Print the records
    List {
        /// Ledger file
        ledger: PathBuf,
    },
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Verify {
            request,
            config,
            vp_token,
            policy,
            token_only,
        } => {
            let valid = commands::execute_verify(request, config, vp_token.then_some(policy), token_only).await?;
            if !valid {
                std::process::exit(2);
            }
            Ok(())
        }
        Commands::Keygen { kid, out } => commands::execute_keygen(kid, out).await,
        Commands::DecodeVro { token, jwks } => commands::execute_decode_vro(token, jwks).await,
        Commands::Anchor { action } => match action {
            AnchorAction::Verify { ledger } => {
                if !commands::execute_anchor_verify(ledger).await? {
                    std::process::exit(1);
                }
                Ok(())
            }
            AnchorAction::List { ledger } => commands::execute_anchor_list(ledger).await,
        },
    }
}
