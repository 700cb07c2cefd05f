//! HTTP surface for consumers
//!
//! - `GET /snapshot` - current view: 200 with the snapshot, 503 once stale
//! - `GET /trails` - entity registry, including vanished entities
//! - `GET /geojson` - matched trail paths as a GeoJSON FeatureCollection
//! - `POST /geometry/reload` - rebuild the geometry index from its source
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus text exposition

use crate::infra::metrics::{Metrics, MetricsSummary, CYCLE_BUCKET_BOUNDS_MS, NUM_BUCKETS};
use crate::services::coordinator::RefreshCoordinator;
use anyhow::Context;
use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::fmt::Write;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Cumulative histogram with sum and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; NUM_BUCKETS],
    bounds: &[u64; NUM_BUCKETS - 1],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {cumulative}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary) -> String {
    let mut output = String::with_capacity(4096);
    write_cycle_metrics(&mut output, summary);
    write_parse_metrics(&mut output, summary);
    write_match_metrics(&mut output, summary);
    output
}

fn write_cycle_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "ski_conditions_cycles_total",
        "Refresh cycles completed",
        MetricType::Counter,
        summary.cycles_total,
    );
    write_metric(
        output,
        "ski_conditions_cycles_published_total",
        "Cycles that published a new snapshot",
        MetricType::Counter,
        summary.cycles_published,
    );
    write_metric(
        output,
        "ski_conditions_cycles_failed_total",
        "Cycles that kept the previous snapshot",
        MetricType::Counter,
        summary.cycles_failed,
    );
    write_metric(
        output,
        "ski_conditions_cycles_coalesced_total",
        "Refresh triggers coalesced into a running cycle",
        MetricType::Counter,
        summary.cycles_coalesced,
    );
    write_metric(
        output,
        "ski_conditions_fetch_transient_failures_total",
        "Fetch failures expected to clear on retry",
        MetricType::Counter,
        summary.fetch_transient_failures,
    );
    write_metric(
        output,
        "ski_conditions_fetch_permanent_failures_total",
        "Fetch failures indicating a moved or removed page",
        MetricType::Counter,
        summary.fetch_permanent_failures,
    );
    write_metric(
        output,
        "ski_conditions_consecutive_failures",
        "Failed cycles since the last success",
        MetricType::Gauge,
        summary.consecutive_failures,
    );
    write_metric(
        output,
        "ski_conditions_last_success_timestamp_seconds",
        "Unix time of the last published snapshot",
        MetricType::Gauge,
        summary.last_success_epoch_secs,
    );
    write_histogram(
        output,
        "ski_conditions_cycle_duration_ms",
        "Refresh cycle duration in milliseconds",
        &summary.cycle_duration_buckets,
        &CYCLE_BUCKET_BOUNDS_MS,
        summary.cycle_duration_sum_ms,
    );
    write_metric(
        output,
        "ski_conditions_cycle_duration_max_ms",
        "Longest refresh cycle",
        MetricType::Gauge,
        summary.cycle_duration_max_ms,
    );
}

fn write_parse_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "ski_conditions_parse_failures_total",
        "Pages rejected for a missing or malformed required section",
        MetricType::Counter,
        summary.parse_failures,
    );
    write_metric(
        output,
        "ski_conditions_parse_warnings_total",
        "Row and field problems recorded while parsing",
        MetricType::Counter,
        summary.parse_warnings_total,
    );
    write_metric(
        output,
        "ski_conditions_rows_skipped_total",
        "Malformed detail rows skipped",
        MetricType::Counter,
        summary.rows_skipped_total,
    );
}

fn write_match_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "ski_conditions_trails",
        "Trails in the published snapshot",
        MetricType::Gauge,
        summary.trails_total,
    );
    write_metric(
        output,
        "ski_conditions_trails_matched",
        "Published trails with a geometry match",
        MetricType::Gauge,
        summary.trails_matched,
    );
    write_metric(
        output,
        "ski_conditions_ways_indexed",
        "Map ways in the geometry index",
        MetricType::Gauge,
        summary.ways_indexed,
    );
    write_metric(
        output,
        "ski_conditions_geometry_loads_total",
        "Successful geometry dataset loads",
        MetricType::Counter,
        summary.geometry_loads,
    );
    write_metric(
        output,
        "ski_conditions_geometry_load_failures_total",
        "Failed geometry dataset loads",
        MetricType::Counter,
        summary.geometry_load_failures,
    );
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .expect("static response should not fail"),
        Err(e) => {
            error!(error = %e, "api_serialize_error");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from("serialization failed")))
                .expect("static response should not fail")
        }
    }
}

/// Matched trails of the current view as a FeatureCollection
fn trail_features(coordinator: &RefreshCoordinator) -> Option<serde_json::Value> {
    let view = coordinator.view(Utc::now());
    let snapshot = view.snapshot()?;
    let features: Vec<serde_json::Value> = snapshot
        .conditions
        .trails
        .iter()
        .filter_map(|trail| {
            let enrichment = snapshot.enrichment(&trail.key())?;
            let geometry = enrichment.geojson()?;
            Some(json!({
                "type": "Feature",
                "id": enrichment.entity_id,
                "geometry": geometry,
                "properties": {
                    "name": trail.name,
                    "number": trail.number,
                    "sector": trail.sector,
                    "difficulty": trail.difficulty,
                    "day_open": trail.day_open,
                    "night_open": trail.night_open,
                    "confidence": enrichment.confidence,
                },
            }))
        })
        .collect();
    Some(json!({ "type": "FeatureCollection", "features": features }))
}

/// Handle HTTP requests
async fn handle_request<B>(
    req: Request<B>,
    coordinator: Arc<RefreshCoordinator>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/snapshot") => {
            let view = coordinator.view(Utc::now());
            let status = if view.is_available() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
            Ok(json_response(status, &view))
        }
        (&Method::GET, "/trails") => Ok(json_response(StatusCode::OK, &coordinator.entities())),
        (&Method::GET, "/geojson") => match trail_features(&coordinator) {
            Some(collection) => Ok(json_response(StatusCode::OK, &collection)),
            None => Ok(json_response(StatusCode::SERVICE_UNAVAILABLE, &coordinator.view(Utc::now()))),
        },
        // Manual geometry reload - POST /geometry/reload
        (&Method::POST, "/geometry/reload") => match coordinator.geometry().reload().await {
            Ok(ways) => {
                info!(ways, "manual_geometry_reload");
                Ok(json_response(StatusCode::OK, &json!({ "ok": true, "ways": ways })))
            }
            Err(e) => {
                error!(error = %e, "manual_geometry_reload_failed");
                Ok(json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    &json!({ "ok": false, "error": format!("{:#}", e) }),
                ))
            }
        },
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.report());
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Serve the API until shutdown
pub async fn start_api_server(
    bind_address: &str,
    port: u16,
    coordinator: Arc<RefreshCoordinator>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((bind_address, port))
        .await
        .with_context(|| format!("failed to bind API server on {}:{}", bind_address, port))?;

    info!(bind = %bind_address, port = %port, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let coordinator = coordinator.clone();
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let coordinator = coordinator.clone();
                                let metrics = metrics.clone();
                                async move { handle_request(req, coordinator, metrics).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
