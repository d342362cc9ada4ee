//! Admin control surface.
//!
//! Served on its own listener so admin traffic is never counted or gated.
//! Limits can be read and changed here; the block registry is read-only.

use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::core::{
    FlowGuard, LimitSnapshot, RecentEvents, SourceCounters, TickReport, TrafficMonitor, WindowBook,
    WindowStats,
};

pub struct AdminState {
    pub guard: Arc<FlowGuard>,
    pub monitor: TrafficMonitor,
    pub windows: WindowBook,
    pub recent: Arc<RecentEvents>,
    pub prometheus: Option<PrometheusHandle>,
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(
                web::resource("/limits")
                    .route(web::get().to(get_limits))
                    .route(web::put().to(update_limits)),
            )
            .service(web::resource("/status").route(web::get().to(status)))
            .service(web::resource("/blocked").route(web::get().to(blocked)))
            .service(web::resource("/sources/{source}").route(web::get().to(source_detail)))
            .service(web::resource("/events").route(web::get().to(recent_events)))
            .service(web::resource("/metrics").route(web::get().to(render_metrics))),
    );
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Partial limits update; absent fields are left unchanged
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LimitsUpdate {
    pub hard_limit: Option<i64>,
    pub min_limit: Option<i64>,
}

#[derive(Serialize)]
struct StatusResponse {
    total_attempted: u64,
    total_served: u64,
    tracked_sources: usize,
    limits: LimitSnapshot,
    latest_tick: Option<TickReport>,
}

#[derive(Serialize)]
struct SourceResponse {
    source: String,
    #[serde(flatten)]
    counters: SourceCounters,
    blocked: bool,
    window: Option<WindowStats>,
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_limits(state: web::Data<AdminState>) -> impl Responder {
    HttpResponse::Ok().json(state.guard.limits().snapshot())
}

async fn update_limits(state: web::Data<AdminState>, update: web::Json<LimitsUpdate>) -> impl Responder {
    let limits = state.guard.limits();
    if let Some(hard_limit) = update.hard_limit {
        limits.set_hard_limit(hard_limit);
    }
    if let Some(min_limit) = update.min_limit {
        limits.set_min_limit(min_limit);
    }
    let snapshot = limits.snapshot();
    log::info!(
        "Limits updated: hard_limit={}, min_limit={}",
        snapshot.hard_limit, snapshot.min_limit
    );
    HttpResponse::Ok().json(snapshot)
}

async fn status(state: web::Data<AdminState>) -> impl Responder {
    let ledger = state.guard.ledger();
    HttpResponse::Ok().json(StatusResponse {
        total_attempted: ledger.total_attempted(),
        total_served: ledger.total_served(),
        tracked_sources: ledger.tracked_sources(),
        limits: state.guard.limits().snapshot(),
        latest_tick: state.monitor.latest().await,
    })
}

async fn blocked(state: web::Data<AdminState>) -> impl Responder {
    let mut blocked = state.guard.registry().snapshot();
    blocked.sort();
    HttpResponse::Ok().json(blocked)
}

async fn source_detail(state: web::Data<AdminState>, path: web::Path<String>) -> impl Responder {
    let source = path.into_inner();
    match state.guard.ledger().counters(&source) {
        Some(counters) => {
            let window = state.windows.get(&source).map(|window| window.stats());
            let blocked = state.guard.registry().contains(&source);
            HttpResponse::Ok().json(SourceResponse { source, counters, blocked, window })
        }
        None => HttpResponse::NotFound().finish(),
    }
}

async fn recent_events(state: web::Data<AdminState>) -> impl Responder {
    HttpResponse::Ok().json(state.recent.recent())
}

async fn render_metrics(state: web::Data<AdminState>) -> impl Responder {
    match &state.prometheus {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NotFound().finish(),
    }
}
