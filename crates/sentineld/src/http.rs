//! HTTP front end: MJPEG preview, SSE alerts and a small JSON control API.

use crate::state::Services;
use crate::stream::CONTENT_TYPE as MJPEG_CONTENT_TYPE;
use async_stream::stream;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub camera_index: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: String,
}

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/alerts", get(alerts))
        .route("/api/scan/start", post(start_scan))
        .route("/api/scan/stop", post(stop_scan))
        .route("/api/status", get(status))
        .route("/api/watchlist", get(watchlist))
        .with_state(services)
}

pub async fn serve(addr: SocketAddr, services: Services) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, router(services)).await
}

/// GET /video_feed
async fn video_feed(State(services): State<Services>) -> impl IntoResponse {
    tracing::debug!("preview viewer connected");
    let body = Body::from_stream(services.pipeline.clone().frames());
    (
        [
            (header::CONTENT_TYPE, MJPEG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
}

/// GET /alerts
async fn alerts(State(services): State<Services>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = services.bus.subscribe();
    let events = stream! {
        loop {
            match rx.recv().await {
                Ok(alert) => match Event::default().event("alert").json_data(&alert) {
                    Ok(event) => yield Ok::<Event, Infallible>(event),
                    Err(e) => tracing::warn!(error = %e, "cannot serialize alert"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "alert subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// POST /api/scan/start
async fn start_scan(
    State(services): State<Services>,
    body: Option<Json<StartRequest>>,
) -> (StatusCode, Json<ControlResponse>) {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    match services.start(request.camera_index).await {
        Ok(index) => (
            StatusCode::OK,
            Json(ControlResponse {
                ok: true,
                message: format!("scanning on camera {index}"),
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "start failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ControlResponse {
                    ok: false,
                    message: e.to_string(),
                }),
            )
        }
    }
}

/// POST /api/scan/stop
async fn stop_scan(State(services): State<Services>) -> (StatusCode, Json<ControlResponse>) {
    match services.stop().await {
        Ok(_) => (
            StatusCode::OK,
            Json(ControlResponse {
                ok: true,
                message: "scanning stopped".into(),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ControlResponse {
                ok: false,
                message: e.to_string(),
            }),
        ),
    }
}

/// GET /api/status
async fn status(State(services): State<Services>) -> impl IntoResponse {
    Json(services.status())
}

/// GET /api/watchlist
async fn watchlist(State(services): State<Services>) -> impl IntoResponse {
    Json(services.watchlist_items())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::services;
    use crate::testing::{test_frame, FakeCamera};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn spawn_server(services: Services) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(services)).await.unwrap();
        });
        addr
    }

    async fn request(addr: SocketAddr, method: &str, path: &str) -> String {
        let mut conn = TcpStream::connect(addr).await.unwrap();
        let req = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
        conn.write_all(req.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        conn.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_status_endpoint_reports_json() {
        let camera = FakeCamera::new(test_frame());
        let addr = spawn_server(services(&camera, None)).await;

        let response = request(addr, "GET", "/api/status").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"scanning\":false"));
        assert!(response.contains("\"watchlist_size\":1"));
    }

    #[tokio::test]
    async fn test_start_and_stop_endpoints() {
        let camera = FakeCamera::new(test_frame());
        let svc = services(&camera, None);
        let addr = spawn_server(svc.clone()).await;

        let response = request(addr, "POST", "/api/scan/start").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(svc.status().scanning);

        let response = request(addr, "POST", "/api/scan/stop").await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(!svc.status().scanning);
    }

    #[tokio::test]
    async fn test_start_unavailable_camera_is_503() {
        let camera = FakeCamera::new(test_frame());
        camera.block_index(0);
        camera.block_index(1);
        let addr = spawn_server(services(&camera, None)).await;

        let response = request(addr, "POST", "/api/scan/start").await;
        assert!(response.starts_with("HTTP/1.1 503"));
        assert!(response.contains("\"ok\":false"));
    }

    #[tokio::test]
    async fn test_video_feed_streams_idle_parts() {
        let camera = FakeCamera::new(test_frame());
        let addr = spawn_server(services(&camera, None)).await;

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while !String::from_utf8_lossy(&received).contains("Content-Type: image/jpeg") {
            let n = conn.read(&mut buf).await.unwrap();
            assert!(n > 0, "connection closed before first part");
            received.extend_from_slice(&buf[..n]);
        }
        let text = String::from_utf8_lossy(&received);
        assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
        assert!(text.contains("--frame\r\n"));
    }
}
