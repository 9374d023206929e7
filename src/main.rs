use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use zone_trader::config::{BacktestRange, ConfigHandle, Credentials, EngineConfig};
use zone_trader::engine::Engine;
use zone_trader::gateway::approval::LlmApprovalClient;
use zone_trader::gateway::dhan::DhanClient;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Underlying security id
    #[arg(long, default_value = "13")]
    instrument: String,

    /// Contracts per trade (lot multiple)
    #[arg(short, long, default_value = "50")]
    quantity: i64,

    /// Place live orders instead of paper trades
    #[arg(long)]
    live: bool,

    /// Allow trading on the weekly expiry day
    #[arg(long)]
    trade_expiry_day: bool,

    /// Backtest start date (YYYY-MM-DD); requires --to
    #[arg(long, requires = "to")]
    from: Option<NaiveDate>,

    /// Backtest end date (YYYY-MM-DD); requires --from
    #[arg(long, requires = "from")]
    to: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("zone_trader=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::default();
    config.instrument_id = args.instrument;
    config.order_quantity = args.quantity;
    config.sandbox = !args.live;
    config.skip_expiry_day = !args.trade_expiry_day;
    if let (Some(from), Some(to)) = (args.from, args.to) {
        config.backtest = Some(BacktestRange { from, to });
    }

    info!(
        instrument = %config.instrument_id,
        sandbox = config.sandbox,
        backtest = config.backtest.is_some(),
        "starting zone trader"
    );

    let credentials = Credentials::from_env();
    credentials.validate()?;

    let gateway = Arc::new(DhanClient::new(
        credentials.broker_client_id.clone(),
        credentials.broker_access_token.clone(),
    )?);
    let approval = Arc::new(LlmApprovalClient::new(credentials.approval_api_key.clone())?);

    let engine = Arc::new(Engine::new(
        ConfigHandle::new(config),
        gateway,
        approval,
    ));

    engine.start(&credentials).await?;

    // Log engine events as they happen.
    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(?event, "engine event");
        }
    });

    let runner = engine.clone();
    let run_task = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!(error = %e, "scheduler exited with error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    engine.stop().await;
    run_task.await?;

    Ok(())
}
