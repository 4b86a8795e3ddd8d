use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tunefs", version, about = "Tag-organized music library filesystem")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a music library
    Mount {
        /// Root of the on-disk music tree
        source: PathBuf,
        /// Where to mount the synthetic tree
        mountpoint: PathBuf,
        /// Optional YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Location of the metadata database
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Comma-separated mount options (allow_other, uid=, gid=, db_path=)
        #[arg(short = 'o', long = "options")]
        options: Option<String>,
        /// Owner override for exposed files
        #[arg(long)]
        uid: Option<u32>,
        /// Group override for exposed files
        #[arg(long)]
        gid: Option<u32>,
        /// Allow other users to access the mount
        #[arg(long)]
        allow_other: bool,
        /// Skip the startup library scan
        #[arg(long)]
        no_scan: bool,
    },
    /// Scan a source tree into the metadata database without mounting
    Scan {
        /// Root of the on-disk music tree
        source: PathBuf,
        /// Location of the metadata database
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Validate a playlist file and print its entries
    Check {
        /// Path to an m3u file
        playlist: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Mount {
            source,
            mountpoint,
            config,
            db_path,
            options,
            uid,
            gid,
            allow_other,
            no_scan,
        } => {
            let args = commands::mount::MountArgs {
                source,
                mountpoint,
                config,
                db_path,
                options,
                uid,
                gid,
                allow_other,
                no_scan,
            };
            commands::mount::run(args)?;
        }
        Commands::Scan { source, db_path } => {
            commands::scan::run(source, db_path)?;
        }
        Commands::Check { playlist } => {
            commands::check::run(&playlist)?;
        }
    }
    Ok(())
}
