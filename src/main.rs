use snappoll::cli::{handle_check, handle_poll, CliArgs, Commands, EXIT_CONFIG};
use snappoll::util::logging::{json_from_env, parse_level};
use snappoll::util::{init_logging, LoggingConfig};
use snappoll::{PollerConfig, NAME, VERSION};

use anyhow::Context;
use clap::Parser;
use std::process;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:#}", e);
            eprintln!("\nPlease check your environment variables.");
            process::exit(EXIT_CONFIG);
        }
    };

    init_logging_from_args(&args, &config);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);
    debug!("{}", config);

    let exit_code = match &args.command {
        Commands::Poll(poll_args) => handle_poll(poll_args, &config).await,
        Commands::Check(check_args) => handle_check(check_args, &config).await,
    };

    process::exit(exit_code);
}

fn load_config() -> anyhow::Result<PollerConfig> {
    let config = PollerConfig::from_env().context("Failed to read configuration")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging_from_args(args: &CliArgs, config: &PollerConfig) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        parse_level(&config.log_level)
    };

    init_logging(LoggingConfig {
        level,
        use_json: json_from_env(),
        ..LoggingConfig::default()
    });
}
