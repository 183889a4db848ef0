//! forecast-engine: inspect the forecast store from the command line.
//!
//! Usage:
//!   forecast-engine                                # apply schema, print a summary
//!   forecast-engine --quotes SH600000 510300       # latest quotes
//!   forecast-engine --public [--horizon 7]         # aligned public predictions
//!   forecast-engine --projection <unique_key>      # future projection
//!   forecast-engine --strategies <user_id>         # strategies visible to a user
//!   forecast-engine --watchlist <user_id>          # a user's watchlist

use anyhow::{bail, Context, Result};
use forecast_engine::{telemetry, EngineConfig, ForecastEngine, PredictionFilter};
use serde::Serialize;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Values following `flag` up to the next `--option`.
fn flag_values<'a>(args: &'a [String], flag: &str) -> Option<Vec<&'a str>> {
    let pos = args.iter().position(|a| a == flag)?;
    Some(
        args[pos + 1..]
            .iter()
            .take_while(|a| !a.starts_with("--"))
            .map(String::as_str)
            .collect(),
    )
}

fn single_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match flag_values(args, flag) {
        None => Ok(None),
        Some(values) => match values.first() {
            Some(v) => Ok(Some(*v)),
            None => bail!("{} requires a value", flag),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env()?;
    telemetry::init_tracing(config.log_format);

    let args: Vec<String> = std::env::args().skip(1).collect();

    let engine = ForecastEngine::connect(&config)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;

    if let Some(symbols) = flag_values(&args, "--quotes") {
        if symbols.is_empty() {
            bail!("--quotes requires at least one symbol");
        }
        let quotes = engine.resolve_latest_quotes(symbols.as_slice()).await?;
        return print_json(&quotes);
    }

    if args.iter().any(|a| a == "--public") {
        let horizon_len = single_value(&args, "--horizon")?
            .map(|v| v.parse::<i32>())
            .transpose()
            .context("--horizon must be an integer")?;
        let views = engine
            .align_public_with_validation(PredictionFilter { horizon_len })
            .await?;
        tracing::info!("{} public predictions", views.len());
        return print_json(&views);
    }

    if let Some(unique_key) = single_value(&args, "--projection")? {
        let projection = engine.future_projection(unique_key).await?;
        return print_json(&projection);
    }

    if let Some(user_id) = single_value(&args, "--strategies")? {
        let user_id: i64 = user_id.parse().context("--strategies expects a numeric user id")?;
        let strategies = engine.list_user_strategies(user_id).await?;
        return print_json(&strategies);
    }

    if let Some(user_id) = single_value(&args, "--watchlist")? {
        let user_id: i64 = user_id.parse().context("--watchlist expects a numeric user id")?;
        let items = engine.get_watchlist(user_id).await?;
        return print_json(&items);
    }

    let public = engine
        .list_public_predictions(PredictionFilter::default())
        .await?;
    tracing::info!(
        "Schema applied to {}; {} public predictions stored",
        config.database_url,
        public.len()
    );

    Ok(())
}
