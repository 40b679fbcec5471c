use visiontool::cli::commands::{CliArgs, Commands};
use visiontool::cli::handlers::{handle_detect, handle_health, handle_run};
use visiontool::config::load_dotenv;
use visiontool::util::logging::{config_from_env, init_logging, parse_level};
use visiontool::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    load_dotenv();
    init_logging_from_args(&args);

    debug!("visiontool v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::Detect(detect_args) => handle_detect(detect_args).await,
        Commands::Health(health_args) => handle_health(health_args).await,
    };

    std::process::exit(exit_code);
}

/// CLI flags take precedence over `VISIONTOOL_LOG_LEVEL`
fn init_logging_from_args(args: &CliArgs) {
    let mut config = config_from_env();

    if let Some(level_str) = &args.log_level {
        config.level = parse_level(level_str);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }

    init_logging(config);
}
