use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "groupsync",
    about = "Sync LDAP/Active Directory group membership into TeamCity",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(short = 'f', long = "file")]
    file: String,

    /// Treat `*` in configured group names as a wildcard
    #[arg(short = 'w', long)]
    wildcard_search: bool,

    /// Resolve members of nested groups
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Lower-case usernames
    #[arg(short = 'l', long)]
    lowercase: bool,

    /// Skip disabled directory accounts
    #[arg(short = 's', long)]
    skip_disabled: bool,

    /// Preview changes without applying
    #[arg(short = 'n', long)]
    dry_run: bool,
}

impl Cli {
    fn sync_flags(&self) -> commands::sync::SyncFlags {
        commands::sync::SyncFlags {
            wildcard: self.wildcard_search,
            recursive: self.recursive,
            lowercase: self.lowercase,
            skip_disabled: self.skip_disabled,
            dry_run: self.dry_run,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    commands::sync::run(&cli.file, cli.sync_flags()).await
}
