mod cmd_analyze;
mod cmd_discover;
mod cmd_reset;
mod cmd_run;
mod cmd_status;
mod cmd_upload;
mod config;
mod context;
mod report;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "distill",
    version,
    about = "Turn transcripts into classified, searchable knowledge-store entries"
)]
struct Cli {
    /// Config file (default: config/distill.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// More logging: -v debug, -vv trace (RUST_LOG overrides)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Console, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover, analyze and upload in one pass
    Run {
        /// Instruction template for every record (default: routed per channel)
        #[arg(long)]
        template: Option<String>,
        /// Resolve notebooks and report uploads without calling the store
        #[arg(long)]
        dry_run: bool,
        /// Only these channels (repeatable)
        #[arg(long = "channel")]
        channels: Vec<String>,
    },
    /// List the records the next run would process
    Discover {
        /// Override the configured minimum word count
        #[arg(long)]
        min_words: Option<u64>,
        /// Only these channels (repeatable)
        #[arg(long = "channel")]
        channels: Vec<String>,
        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Analyze and segment new records into the pending area
    Analyze {
        /// Instruction template for every record (default: routed per channel)
        #[arg(long)]
        template: Option<String>,
        /// Only these channels (repeatable)
        #[arg(long = "channel")]
        channels: Vec<String>,
    },
    /// Upload pending records to the knowledge store
    Upload {
        /// Resolve notebooks and report uploads without calling the store
        #[arg(long)]
        dry_run: bool,
    },
    /// Count records per lifecycle state and list failures
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset a failed record so it is retried
    Reset {
        /// Content id (video_id) of the failed record
        video_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Console,
    /// One JSON object per line
    Json,
}

fn init_logging(verbose: u8, format: LogFormat) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let crates = [
            "distill",
            "distill_core",
            "distill_store",
            "distill_discovery",
            "distill_segment",
            "distill_llm",
            "distill_notebook",
            "distill_conductor",
        ];
        let directives: Vec<String> = crates.iter().map(|c| format!("{c}={level}")).collect();
        tracing_subscriber::EnvFilter::new(format!("warn,{}", directives.join(",")))
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Console => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);
    let config = config::Config::load(cli.config.as_deref())?;

    match cli.cmd {
        Command::Run {
            template,
            dry_run,
            channels,
        } => cmd_run::execute(cmd_run::RunParams {
            config: &config,
            template,
            dry_run,
            channels: &channels,
        }),
        Command::Discover {
            min_words,
            channels,
            json,
        } => cmd_discover::execute(&config, min_words, &channels, json),
        Command::Analyze { template, channels } => {
            cmd_analyze::execute(&config, template, &channels)
        }
        Command::Upload { dry_run } => cmd_upload::execute(&config, dry_run),
        Command::Status { json } => cmd_status::execute(&config, json),
        Command::Reset { video_id } => cmd_reset::execute(&config, &video_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_console() {
        let cli = Cli::try_parse_from(["distill", "status"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Console);
    }

    #[test]
    fn log_format_json_is_global() {
        let cli = Cli::try_parse_from(["distill", "status", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["distill", "--log-format", "xml", "status"]).is_err());
    }
}
