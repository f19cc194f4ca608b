//! Trace viewer server
//!
//! Serves a recorded trace over HTTP for the bundled web page:
//! - `GET /api/trace?start=N&end=M` returns entries in an inclusive range
//! - `GET /api/trace/:step` returns a single entry
//! - `GET /api/stats` returns the aggregate analysis
//! - anything else falls through to static files under `web/`, resolved
//!   relative to the working directory

use std::net::SocketAddr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::stats::TraceStats;
use crate::storage::{TraceDb, TraceEntry};

/// Inclusive step range, both ends optional
#[derive(Debug, Deserialize)]
struct TraceQuery {
    start: Option<u64>,
    end: Option<u64>,
}

/// Payload for the range endpoint
#[derive(Debug, Serialize)]
struct TraceResponse {
    entries: Vec<TraceEntry>,
    total: usize,
}

/// Build the viewer router over a loaded trace
#[must_use]
pub fn router(db: TraceDb) -> Router {
    Router::new()
        .route("/api/trace", get(get_trace))
        .route("/api/trace/:step", get(get_step))
        .route("/api/stats", get(get_stats))
        .fallback_service(ServeDir::new("web"))
        .layer(CorsLayer::permissive())
        .with_state(db)
}

/// Serve the viewer on localhost until the process is stopped
pub async fn serve(db: TraceDb, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "viewer listening");
    axum::serve(listener, router(db)).await
}

async fn get_trace(
    State(db): State<TraceDb>,
    Query(query): Query<TraceQuery>,
) -> Json<TraceResponse> {
    let start = query.start.unwrap_or(0);
    let end = query.end.unwrap_or(u64::MAX);
    Json(TraceResponse {
        entries: db.get_range(start, end),
        total: db.count(),
    })
}

async fn get_step(
    State(db): State<TraceDb>,
    Path(step): Path<u64>,
) -> Result<Json<TraceEntry>, StatusCode> {
    db.get(step).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn get_stats(State(db): State<TraceDb>) -> Json<TraceStats> {
    Json(TraceStats::analyze(&db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InsnKind, RegisterFile};

    fn sample_db() -> TraceDb {
        let db = TraceDb::new();
        for step in 0..4 {
            db.insert(TraceEntry {
                step,
                pc: 0x1000 + step * 4,
                insn_bytes: vec![0x90],
                mnemonic: "nop".to_string(),
                operands: String::new(),
                kind: InsnKind::Other,
                depth: 0,
                regs: RegisterFile {
                    pc: 0x1000 + step * 4,
                    sp: 0x7fff_0000,
                    gpr: Vec::new(),
                },
                mem_changes: Vec::new(),
            });
        }
        db
    }

    #[tokio::test]
    async fn trace_endpoint_honors_range() {
        let query = TraceQuery {
            start: Some(1),
            end: Some(2),
        };
        let Json(resp) = get_trace(State(sample_db()), Query(query)).await;

        let steps: Vec<u64> = resp.entries.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(resp.total, 4);
    }

    #[tokio::test]
    async fn trace_endpoint_tolerates_reversed_range() {
        let query = TraceQuery {
            start: Some(5),
            end: Some(2),
        };
        let Json(resp) = get_trace(State(sample_db()), Query(query)).await;

        assert!(resp.entries.is_empty());
        assert_eq!(resp.total, 4);
    }

    #[tokio::test]
    async fn trace_endpoint_defaults_to_everything() {
        let query = TraceQuery {
            start: None,
            end: None,
        };
        let Json(resp) = get_trace(State(sample_db()), Query(query)).await;
        assert_eq!(resp.entries.len(), 4);
    }

    #[tokio::test]
    async fn step_endpoint_finds_one_entry() {
        let Json(entry) = get_step(State(sample_db()), Path(2))
            .await
            .expect("step 2 exists");
        assert_eq!(entry.pc, 0x1008);
    }

    #[tokio::test]
    async fn missing_step_is_not_found() {
        let err = get_step(State(sample_db()), Path(99))
            .await
            .expect_err("step 99 does not exist");
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_endpoint_analyzes_db() {
        let Json(stats) = get_stats(State(sample_db())).await;
        assert_eq!(stats.total_steps, 4);
        assert_eq!(stats.unique_pcs, 4);
    }

    #[test]
    fn router_builds() {
        let _ = router(TraceDb::new());
    }
}
