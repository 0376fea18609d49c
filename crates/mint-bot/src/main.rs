use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use mint_bot::{attempt_table, broadcast_table, EngineServices, MintEngine, RunOutcome};
use mint_config::Config;
use mint_core::{init_logging, LogFormat};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let matches = Command::new("flashmint")
        .version(mint_core::version())
        .about("Flashbots bundle minting engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .required(true)
                .help("JSON or YAML configuration file"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["json", "pretty"])
                .default_value("pretty")
                .help("Log output format"),
        )
        .arg(
            Arg::new("max-attempts")
                .long("max-attempts")
                .value_name("N")
                .value_parser(value_parser!(u32).range(1..))
                .help("Stop retrying after N submission attempts"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Compile and simulate, never submit"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .context("--config is required")?;
    let mut config = Config::load_from_file(config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    if let Some(max_attempts) = matches.get_one::<u32>("max-attempts") {
        config.max_attempts = Some(*max_attempts);
    }

    let log_format = matches
        .get_one::<String>("log-format")
        .map(|f| f.parse::<LogFormat>())
        .transpose()
        .map_err(anyhow::Error::msg)?
        .unwrap_or_default();
    init_logging(log_format, &config.log_level).context("Invalid log level")?;

    info!("Starting flashmint v{}", mint_core::version());

    let services = EngineServices::connect(&config)?;
    let engine = MintEngine::new(config, services)?.with_dry_run(matches.get_flag("dry-run"));

    let run = engine.run();
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received shutdown signal");
            engine.shutdown();
            run.await
        }
    };

    match outcome {
        Ok(RunOutcome::Submitted(reports)) => {
            for report in &reports {
                info!(
                    included_block = report.included_block,
                    attempts = report.attempt_count(),
                    prefix_cleared = report.prefix_cleared,
                    "Bundle landed"
                );
                print!("{}", attempt_table(&report.attempts));
            }
        }
        Ok(RunOutcome::Broadcast(summary)) => {
            info!(sent = summary.sent.len(), failed = summary.failed, "Broadcast finished");
            print!("{}", broadcast_table(&summary));
        }
        Ok(RunOutcome::DryRun(report)) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), run_id = %engine.run_id(), "Run failed");
            return Err(e);
        }
    }

    info!("flashmint finished");
    Ok(())
}
