mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "cocoon")]
#[command(about = "Per-user key management and envelope encryption for private journals")]
#[command(version)]
struct Cli {
    /// Path to the Cocoon config directory (default: ~/.cocoon)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// User whose keys are operated on
    #[arg(long, global = true, env = "COCOON_USER", default_value = "default")]
    user: String,

    /// Bearer credential for the KMS, when enabled
    #[arg(long, global = true, env = "COCOON_KMS_TOKEN", hide_env_values = true)]
    kms_token: Option<String>,

    /// Backup password (or set COCOON_PASSWORD). Prompted for if absent.
    #[arg(long, global = true, env = "COCOON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and key database
    Init,

    /// Show current configuration
    Config,

    /// Show the active key (fingerprint, version, source)
    Key,

    /// Replace the active key
    Rotate {
        /// Reason recorded in the rotation log
        #[arg(long, default_value = "manual")]
        reason: String,
    },

    /// Encrypt text under the active key and print the payload JSON
    Encrypt {
        /// Plaintext to encrypt
        text: String,
    },

    /// Decrypt a payload produced by `encrypt`
    Decrypt {
        /// Payload JSON
        payload: String,
    },

    /// Export the active key wrapped under a password
    Backup,

    /// Install a key from a backup string
    Restore {
        /// Backup string produced by `backup`
        backup: String,
        /// Only check the password and print the key fingerprint
        #[arg(long)]
        verify: bool,
    },

    /// Show rotation and backup history
    History,
}

/// Password from the CLI arg, env var, or an interactive prompt.
pub fn get_password(cli_password: &Option<String>, prompt: &str) -> anyhow::Result<Zeroizing<String>> {
    if let Some(p) = cli_password {
        return Ok(Zeroizing::new(p.clone()));
    }
    let input = rpassword::prompt_password_stdout(prompt)?;
    Ok(Zeroizing::new(input))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cocoon_keys=info".parse()?)
                .add_directive("cocoon_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.config_dir {
        Some(ref dir) => dir.clone(),
        None => cocoon_core::config::CocoonConfig::default_base_dir()?,
    };
    let ctx = commands::Context {
        base_dir,
        user: cli.user.clone(),
        kms_token: cli.kms_token.clone(),
    };

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Init => commands::init::run(&ctx.base_dir),
        Commands::Config => commands::config::run(&ctx.base_dir),
        Commands::Key => rt.block_on(commands::key::run(&ctx)),
        Commands::Rotate { ref reason } => rt.block_on(commands::rotate::run(&ctx, reason)),
        Commands::Encrypt { ref text } => rt.block_on(commands::encrypt::run(&ctx, text)),
        Commands::Decrypt { ref payload } => rt.block_on(commands::decrypt::run(&ctx, payload)),
        Commands::Backup => rt.block_on(commands::backup::run(&ctx, &cli.password)),
        Commands::Restore { ref backup, verify } => {
            rt.block_on(commands::restore::run(&ctx, backup, verify, &cli.password))
        }
        Commands::History => rt.block_on(commands::history::run(&ctx)),
    }
}
