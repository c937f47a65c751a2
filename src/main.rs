//! Infrastack - declare and apply a single-instance application stack
//!
//! This is the main entry point for the Infrastack CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use infrastack::config::{Config, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application version information
const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration, then layer the command line on top
    let mut config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: Failed to load config: {:#}", e);
            std::process::exit(2);
        }
    };
    cli.apply_overrides(&mut config);

    init_logging(cli.verbosity(), &config.logging);

    if cli.verbosity() >= 2 {
        eprintln!("Infrastack v{} by {}", VERSION, AUTHORS);
    }

    let mut ctx = CommandContext::new(&cli, config);

    let exit_code = match run(&cli, &mut ctx).await {
        Ok(code) => code,
        Err(err) => report_error(&ctx, &err),
    };

    ctx.output.flush();
    std::process::exit(exit_code);
}

async fn run(cli: &Cli, ctx: &mut CommandContext) -> Result<i32> {
    match &cli.command {
        Commands::Plan(args) => args.execute(ctx).await,
        Commands::Apply(args) => args.execute(ctx).await,
        Commands::Outputs(args) => args.execute(ctx).await,
        Commands::BootScript(args) => args.execute(ctx).await,
        Commands::Graph(args) => args.execute(ctx).await,
    }
}

/// Print a failed command's error and pick the exit code.
fn report_error(ctx: &CommandContext, err: &anyhow::Error) -> i32 {
    ctx.output.error(&format!("{:#}", err));

    let Some(error) = err.downcast_ref::<infrastack::Error>() else {
        return 1;
    };
    match error {
        infrastack::Error::MissingInput(name) => ctx.output.hint(&format!(
            "set `{}` under [stack] in infrastack.toml or export INFRASTACK_{}",
            name,
            name.to_uppercase()
        )),
        e if !e.is_local() => ctx
            .output
            .hint("resources created before the failure are recorded in the state file"),
        _ => {}
    }
    error.exit_code()
}

/// Initialize logging based on verbosity level and the logging config.
///
/// `RUST_LOG` wins over `-v`, which wins over `logging.level`.
fn init_logging(verbosity: u8, logging: &LoggingConfig) {
    let filter = match verbosity {
        0 => logging.level.as_deref().unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so stdout stays parseable in JSON mode.
    if logging.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(verbosity >= 3)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}
