use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use court_booking::csv::{read_scenario, write_games, write_refunds, write_slots, write_wallets};
use court_booking::{Config, Context, Engine, ManualClock, Store, reconcile};
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: court-booking <scenario.csv> [wallets|slots|refunds|games]";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };
    let report = args.next().unwrap_or_else(|| "wallets".to_string());
    if !matches!(report.as_str(), "wallets" | "slots" | "refunds" | "games") {
        eprintln!("unknown report '{report}'\n{USAGE}");
        return ExitCode::FAILURE;
    }

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let rows = match read_scenario(path.clone()) {
        Ok(rows) => rows,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // the first row moves the clock to scenario time
    let clock = Arc::new(ManualClock::new(DateTime::<Utc>::UNIX_EPOCH));
    let ctx = Context::new(Arc::new(Store::new()), clock.clone(), config);
    let engine = Engine::new(ctx.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = reconcile::spawn(ctx, shutdown_rx);

    let (row_sender, row_receiver) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        for result in rows {
            match result {
                Ok(row) => {
                    if row_sender.send(row).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(&clock, ReceiverStream::new(row_receiver)).await;

    let _ = shutdown_tx.send(true);
    for job in jobs {
        let _ = job.await;
    }

    let stdout = io::stdout();
    let out = stdout.lock();
    let written = match report.as_str() {
        "slots" => write_slots(out, engine.slots()),
        "refunds" => write_refunds(out, engine.refunds()),
        "games" => write_games(out, engine.games()),
        _ => write_wallets(out, engine.wallets()),
    };
    if let Err(e) = written {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
