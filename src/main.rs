// src/main.rs

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use booking_subscriber::broker::RedisSession;
use booking_subscriber::config::Config;
use booking_subscriber::metrics::{spawn_http_server, spawn_stats_logger, Metrics};
use booking_subscriber::model::BookingChannel;
use booking_subscriber::router::{EventRouter, LogSink};
use booking_subscriber::shutdown::{spawn_signal_listener, Shutdown, StopReason};
use booking_subscriber::subscriber::Subscriber;

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = Config::from_env();
    init_tracing(cfg.as_ref().map(|c| c.log_json).unwrap_or(false));

    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(target: "booking_config", error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(
        target: "booking_config",
        app_version = env!("CARGO_PKG_VERSION"),
        redis_url = %cfg.redis_url,
        "booking event subscriber starting"
    );

    let shutdown = Arc::new(Shutdown::new());
    let metrics = Metrics::new();

    let signal_handle = spawn_signal_listener(shutdown.clone());
    let http_handle = cfg
        .metrics_addr
        .clone()
        .map(|addr| spawn_http_server(metrics.clone(), addr, shutdown.clone()));
    let stats_handle = cfg
        .stats_interval
        .map(|period| spawn_stats_logger(metrics.clone(), shutdown.clone(), period));

    let connected = tokio::select! {
        res = RedisSession::connect(&cfg) => Some(res),
        _ = shutdown.wait() => None,
    };

    let code = match connected {
        None => {
            info!(target: "booking_shutdown", "shutdown requested before connecting");
            ExitCode::SUCCESS
        }
        Some(Err(err)) => {
            error!(target: "booking_broker", error = %err, "failed to connect to redis; exiting");
            shutdown.request_stop(StopReason::Requested);
            ExitCode::FAILURE
        }
        Some(Ok(session)) => {
            let router = EventRouter::bookings(Arc::new(LogSink));
            let mut subscriber = Subscriber::new(session, router, shutdown.clone(), metrics);
            match subscriber.run(&BookingChannel::names()).await {
                Ok(()) => ExitCode::SUCCESS,
                Err(err) => {
                    error!(target: "booking_events", error = %err, "booking subscriber exited with error");
                    if err.fails_process() {
                        ExitCode::FAILURE
                    } else {
                        ExitCode::SUCCESS
                    }
                }
            }
        }
    };

    // Background tasks exit on the shutdown notification.
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }
    if let Some(handle) = stats_handle {
        let _ = handle.await;
    }
    signal_handle.abort();

    code
}

fn init_tracing(json: bool) {
    // Default info so notifications are visible; override with RUST_LOG.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stdout);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
