//! Flow shield service
//!
//! This is the main entry point for the flow shield. It wires the shared
//! detection state, starts the detection ticker on its own thread, the
//! optional capture pipeline, the gated HTTP server and the admin server.

use std::sync::Arc;
use std::time::Duration;

use actix_rt::Arbiter;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::{error, info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::{oneshot, watch};

use flow_shield::api::{self, AdminState};
use flow_shield::config;
use flow_shield::core::capture::{self, CapturePipeline};
use flow_shield::core::events::emit;
use flow_shield::core::{
    ConsoleSink, EventSink, FanoutSink, FileSink, FirewallEvent, FlowGuard, Limits, RecentEvents,
    TrafficMonitor,
};
use flow_shield::models::EventsConfig;

fn build_sink(config: &EventsConfig, recent: Arc<RecentEvents>) -> anyhow::Result<Arc<dyn EventSink>> {
    let mut sink = FanoutSink::new().with(recent);
    if config.console {
        sink = sink.with(Arc::new(ConsoleSink));
    }
    if let Some(path) = &config.file {
        sink = sink.with(Arc::new(FileSink::open(path)?));
    }
    Ok(Arc::new(sink))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting flow shield...");

    let config = config::load_config().context("Failed to load configuration")?;

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder unavailable: {}", e);
            None
        }
    };

    let recent = Arc::new(RecentEvents::new(config.events.recent_capacity));
    let sink = build_sink(&config.events, recent.clone()).context("Failed to set up event output")?;
    let guard = Arc::new(FlowGuard::new(Limits::from(&config.detection), sink));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Detection ticks run on a dedicated thread, away from request workers
    let engine = guard
        .detection_engine()
        .with_warmup_samples(config.detection.warmup_samples);
    let windows = engine.windows();
    let monitor = TrafficMonitor::new();
    let ticker = Arbiter::new();
    let period = Duration::from_millis(config.detection.tick_interval_ms.max(1));
    let (ticker_done_tx, ticker_done_rx) = oneshot::channel();
    let ticker_task = monitor.clone().run(engine, period, shutdown_rx.clone());
    let spawned = ticker.spawn(async move {
        ticker_task.await;
        let _ = ticker_done_tx.send(());
    });
    if !spawned {
        anyhow::bail!("Detection ticker thread is not running");
    }

    // Without a capture source, detection relies on HTTP-observed traffic only
    let mut capture_process = None;
    let mut capture_pipeline = None;
    if let Some(command) = &config.capture.command {
        match capture::spawn_command(command) {
            Ok((child, stdout)) => {
                info!("Capturing observations from `{}`", command);
                capture_process = Some(child);
                capture_pipeline = Some(CapturePipeline::start(
                    stdout,
                    guard.ledger().clone(),
                    guard.sink().clone(),
                    config.capture.queue_capacity,
                    shutdown_rx.clone(),
                ));
            }
            Err(e) => {
                error!("{}", e);
                emit(guard.sink().as_ref(), &FirewallEvent::CaptureFailure { reason: e.to_string() });
            }
        }
    }

    let gate = web::Data::new(guard.admission_gate());
    let gate_server = HttpServer::new(move || {
        App::new()
            .app_data(gate.clone())
            .wrap(Logger::default())
            .default_service(web::to(api::admit))
    })
    .workers(config.server.workers.max(1))
    .bind((config.server.host.as_str(), config.server.port))?
    .run();
    info!("Gated server listening on {}:{}", config.server.host, config.server.port);

    let served = if config.admin.enabled {
        let state = web::Data::new(AdminState {
            guard: guard.clone(),
            monitor,
            windows,
            recent,
            prometheus,
        });
        let admin_server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .configure(api::admin::config)
        })
        .workers(1)
        .bind((config.admin.host.as_str(), config.admin.port))?
        .run();
        info!("Admin API listening on {}:{}", config.admin.host, config.admin.port);
        futures::future::try_join(gate_server, admin_server).await.map(|_| ())
    } else {
        gate_server.await
    };

    info!("Shutting down detection");
    let _ = shutdown_tx.send(true);
    if let Some(pipeline) = capture_pipeline {
        let recorded = pipeline.join().await;
        info!("Capture pipeline recorded {} attempts", recorded);
    }
    drop(capture_process);
    // Let an in-flight tick finish before tearing the thread down
    let _ = ticker_done_rx.await;
    ticker.stop();
    if ticker.join().is_err() {
        warn!("Detection ticker thread panicked");
    }

    served.context("HTTP server failed")
}
