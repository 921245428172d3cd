use std::env;
use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

use dvbcss_proxy::cii_server::{BlockableCiiServer, CiiServer};
use dvbcss_proxy::engine::ProxyEngine;
use dvbcss_proxy::http::context::WebContext;
use dvbcss_proxy::http::server::build_router;
use dvbcss_proxy::ts_server::TsServer;
use dvbcss_proxy::wallclock::{measure_precision, UdpWallClockServer, WallClock};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "dvbcss_proxy=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().pretty())
        .init();

    let version = dvbcss_proxy::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{}", version);
            std::process::exit(0);
        }
    });

    let config = dvbcss_proxy::config::Config::new()?;

    let wallclock = WallClock::new();
    // few iterations; on some platforms the system clock is low precision
    let precision = measure_precision(&wallclock, 20);
    let max_freq_error = 500.0;

    let host = "0.0.0.0";
    let ws_port = *config.ws_port.as_ref();
    let wc_port = *config.wc_port.as_ref();
    let advertise = config.advertise_addr.as_str();

    let proxy_url = format!("ws://{host}:{ws_port}/server");
    let cii_bound_url = format!("ws://{host}:{ws_port}/cii");
    let cii_url = format!("ws://{advertise}:{ws_port}/cii");
    let ts_url = format!("ws://{advertise}:{ws_port}/ts");
    let wc_url = if *config.ws_wallclock.as_ref() {
        format!("ws://{advertise}:{ws_port}/wcws")
    } else {
        format!("udp://{advertise}:{wc_port}")
    };

    let cii_server = BlockableCiiServer::new(CiiServer::new(false));
    let ts_server = TsServer::new(wallclock, false);
    let engine = ProxyEngine::new(cii_server, ts_server, &cii_url, &ts_url, &wc_url);

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    {
        let tracker = tracker.clone();
        let inner_token = token.clone();

        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::spawn(async move {
            tokio::select! {
                () = inner_token.cancelled() => { },
                _ = terminate => {},
                _ = ctrl_c => {},
            }

            tracker.close();
            inner_token.cancel();
        });
    }

    let web_context = WebContext::new(
        engine,
        config.controller_allow.as_ref().clone(),
        wallclock,
        precision,
        max_freq_error,
        token.clone(),
    );
    let app = build_router(web_context);

    tracing::info!(url = %proxy_url, "proxying server");
    tracing::info!(url = %cii_bound_url, advertised_as = %cii_url, "CII server");
    tracing::info!(ts_url = %ts_url, wc_url = %wc_url, "advertised in CII messages");

    // Standard UDP wall clock exchange; runs regardless of whether the
    // WebSocket variant is the one being advertised.
    {
        let wc_server = UdpWallClockServer::bind(
            &format!("{host}:{wc_port}"),
            wallclock,
            precision,
            max_freq_error,
            token.clone(),
        )
        .await?;
        let inner_token = token.clone();
        tracker.spawn(async move {
            if let Err(err) = wc_server.run_background().await {
                tracing::warn!(error = ?err, "wall clock server error");
            }
            inner_token.cancel();
        });
    }

    {
        let inner_token = token.clone();
        tracker.spawn(async move {
            let listener = TcpListener::bind(&format!("{host}:{ws_port}"))
                .await
                .unwrap();

            let shutdown_token = inner_token.clone();
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                tokio::select! {
                    () = shutdown_token.cancelled() => { }
                }
                tracing::info!("axum graceful shutdown complete");
            })
            .await;
            if let Err(err) = result {
                tracing::error!("axum task failed: {}", err);
            }

            inner_token.cancel();
        });
    }

    tracker.wait().await;

    Ok(())
}
