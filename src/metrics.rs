//! Process-wide metrics recorder install (ambient observability; the
//! `metrics`/`metrics-exporter-prometheus` pair is in the teacher's
//! dependency table but never wired up there — this does the standard
//! wiring the crates document, exposing a `/metrics` scrape endpoint
//! independent of the core's tracking traffic).

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

pub fn install(listen_addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()?;
    tracing::info!(%listen_addr, "Prometheus metrics endpoint listening");
    Ok(())
}
