use anyhow::Context;
use clap::Parser;
use review_dispatch::utils::error::{ErrorSeverity, ReviewError};
use review_dispatch::utils::{logger, validation::Validate};
use review_dispatch::{Application, CliConfig, ServiceConfig, Settings};
use serde_json::json;
use tokio::task::JoinSet;

fn exit_code(e: &ReviewError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn report(context: &str, e: &ReviewError) {
    tracing::error!(
        "{}: {} (severity: {:?}, retryable: {})",
        context,
        e,
        e.severity(),
        e.is_retryable()
    );
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());
}

fn load_settings(cli: &CliConfig) -> Result<Settings, ReviewError> {
    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            ServiceConfig::from_file(path)?
        }
        None => {
            tracing::info!("No --config given, reading configuration from environment");
            ServiceConfig::from_env()?
        }
    };
    config.resolve()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::info!("Starting review-dispatch CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = cli.validate() {
        report("Invalid arguments", &e);
        std::process::exit(1);
    }
    let options = cli.query_options()?;

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            report("Configuration failed", &e);
            std::process::exit(exit_code(&e).max(1));
        }
    };

    let app = match Application::build(&settings) {
        Ok(app) => app,
        Err(e) => {
            report("Failed to start", &e);
            std::process::exit(exit_code(&e).max(1));
        }
    };

    let mut tasks = JoinSet::new();
    for (index, url) in cli.urls.iter().cloned().enumerate() {
        let service = app.service().clone();
        let options = options.clone();
        let kind = cli.kind;
        tasks.spawn(async move {
            let result = service.get_or_parse(kind, &url, &options).await;
            (index, url, result)
        });
    }

    let mut outcomes = Vec::with_capacity(cli.urls.len());
    let mut worst_exit = 0;
    while let Some(joined) = tasks.join_next().await {
        let (index, url, result) = joined.context("request task panicked")?;
        let entry = match result {
            Ok(data) => {
                tracing::info!(url = %url, reviews = data.reviews.len(), "Request completed");
                json!({ "url": url, "data": data })
            }
            Err(e) => {
                report(&format!("Request for {} failed", url), &e);
                worst_exit = worst_exit.max(exit_code(&e));
                json!({ "url": url, "error": e.to_string() })
            }
        };
        outcomes.push((index, entry));
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut output = json!({
        "kind": cli.kind,
        "results": outcomes.into_iter().map(|(_, entry)| entry).collect::<Vec<_>>(),
    });
    if cli.stats {
        output["stats"] = serde_json::to_value(app.stats()).context("failed to encode stats")?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to encode results")?
    );

    app.shutdown().await;

    if worst_exit > 0 {
        std::process::exit(worst_exit);
    }
    Ok(())
}
