//! auditsync command-line entry point.

use anyhow::Result;
use auditsync::commands::{self, SyncOptions};
use auditsync::{ExportError, Home};
use auditsync_logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "auditsync", version, about = "Incremental audit export")]
struct Cli {
    /// Show debug output on the console
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export audits and actions modified since the last run
    Sync {
        /// Config file name under `configs/`
        #[arg(long)]
        config: Option<String>,

        /// Output formats (csv, pdf, docx, json, media, web-report-link, sql, parquet,
        /// actions, actions-sql)
        #[arg(short = 'f', long = "format", num_args = 1..)]
        formats: Vec<String>,

        /// Keep running, checking for changes every `sync_delay_in_seconds`
        #[arg(long = "loop")]
        repeat: bool,

        /// Overlay AUDITSYNC_* environment variables on the config
        #[arg(long)]
        env: bool,
    },

    /// List report preferences available to the token
    Preferences {
        /// Restrict to these template ids
        template_ids: Vec<String>,

        #[arg(long)]
        config: Option<String>,

        #[arg(long)]
        env: bool,
    },

    /// Create the default config file and seed the audits watermark
    Init {
        /// Start exporting from now instead of from the beginning
        #[arg(long)]
        from_now: bool,
    },

    /// Show the current watermarks
    Watermark {
        #[arg(long)]
        config: Option<String>,
    },
}

fn run(cli: Cli, home: &Home) -> Result<()> {
    match cli.command {
        Commands::Sync {
            config,
            formats,
            repeat,
            env,
        } => commands::run_sync(
            home,
            SyncOptions {
                config,
                formats,
                repeat,
                use_env: env,
            },
        ),
        Commands::Preferences {
            template_ids,
            config,
            env,
        } => commands::show_preferences(
            home,
            config.as_deref(),
            env,
            &template_ids,
            &mut std::io::stdout(),
        ),
        Commands::Init { from_now } => commands::init(home, from_now).map(|_| ()),
        Commands::Watermark { config } => {
            commands::show_watermark(home, config.as_deref(), &mut std::io::stdout())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let home = match Home::resolve() {
        Ok(home) => home,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(LogConfig {
        app_name: "auditsync",
        log_dir: home.log_dir(),
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run(cli, &home) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<ExportError>() {
            Some(ExportError::Interrupted) => {
                info!("Interrupted by user, exiting.");
                ExitCode::SUCCESS
            }
            _ => {
                error!("{:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}
