//! Actix Web server exposing the control page, the render surface and page
//! state.
//!
//! The server runs on a dedicated thread to keep the event loop free from
//! Actix runtime concerns. Handlers only read shared state; control clicks
//! are forwarded to the event loop as [`Event`]s.

use std::{net::TcpListener, time::Duration};

use actix_web::{
    App, HttpResponse, HttpServer,
    http::header,
    web::{self, Bytes},
};
use anyhow::{Context, Result};
use async_stream::stream;
use crossbeam_channel::Sender;
use image::RgbaImage;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::client::{
    data::SharedPage,
    event::{ControlAction, Event},
    html::INDEX_HTML,
    surface::{SharedSurface, encode_jpeg},
    telemetry,
};

const STREAM_INTERVAL: Duration = Duration::from_millis(33);

/// Shared state backing HTTP handlers.
#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) surface: SharedSurface,
    pub(crate) page: SharedPage,
    pub(crate) events: Sender<Event>,
    pub(crate) jpeg_quality: u8,
}

/// Handle for the preview server thread.
#[derive(Default)]
pub(crate) struct PreviewServer {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PreviewServer {
    /// Signal the server to stop and block until the thread exits.
    pub(crate) fn stop(self) {
        if let Some(tx) = self.shutdown {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

#[derive(Deserialize)]
struct VisibilityBody {
    hidden: bool,
}

/// Spawn the preview server thread on an already bound listener.
pub(crate) fn spawn_preview_server(
    listener: TcpListener,
    state: ServerState,
) -> Result<PreviewServer> {
    let addr = listener
        .local_addr()
        .context("Failed to read preview server address")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = telemetry::spawn_thread("preview-server", move || {
        if let Err(err) = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(state.clone()))
                    .configure(routes)
            })
            .workers(1)
            .disable_signals()
            .listen(listener)?
            .run();

            let srv_handle = server.handle();
            actix_web::rt::spawn(async move {
                let _ = shutdown_rx.await;
                srv_handle.stop(true).await;
            });

            server.await
        }) {
            error!("HTTP server error: {err}");
        }
    })
    .context("Failed to spawn preview server thread")?;
    info!("Control page at http://{addr}/");
    Ok(PreviewServer {
        shutdown: Some(shutdown_tx),
        handle: Some(handle),
    })
}

pub(crate) fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/frame.jpg", web::get().to(frame_handler))
        .route("/stream.mjpg", web::get().to(stream_handler))
        .route("/state", web::get().to(state_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/control/{action}", web::post().to(control_handler))
        .route("/visibility", web::post().to(visibility_handler));
}

/// Copy the surface out from under its lock, `None` while it has no size.
fn surface_snapshot(state: &ServerState) -> Option<RgbaImage> {
    let guard = state.surface.lock().ok()?;
    if guard.is_empty() {
        None
    } else {
        Some(guard.snapshot())
    }
}

fn surface_jpeg(state: &ServerState) -> Option<Vec<u8>> {
    let image = surface_snapshot(state)?;
    match encode_jpeg(&image, state.jpeg_quality) {
        Ok(jpeg) => Some(jpeg),
        Err(err) => {
            error!("failed to encode preview frame: {err}");
            None
        }
    }
}

async fn index_route() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

/// Return the render surface as a single JPEG.
async fn frame_handler(state: web::Data<ServerState>) -> HttpResponse {
    match surface_jpeg(&state) {
        Some(jpeg) => HttpResponse::Ok()
            .content_type("image/jpeg")
            .append_header(("Cache-Control", "no-cache"))
            .body(jpeg),
        None => HttpResponse::NoContent().finish(),
    }
}

/// Stream the render surface as MJPEG over a multipart response.
async fn stream_handler(state: web::Data<ServerState>) -> HttpResponse {
    let state = state.clone();
    let stream = stream! {
        let mut interval = actix_web::rt::time::interval(STREAM_INTERVAL);
        let mut sequence: u64 = 0;
        loop {
            interval.tick().await;
            if let Some(jpeg) = surface_jpeg(&state) {
                sequence += 1;
                let mut payload = Vec::with_capacity(jpeg.len() + 64);
                payload.extend_from_slice(b"--frame\r\n");
                payload.extend_from_slice(format!("X-Sequence: {sequence}\r\n").as_bytes());
                payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
                payload.extend_from_slice(&jpeg);
                payload.extend_from_slice(b"\r\n");
                yield Ok::<Bytes, actix_web::Error>(Bytes::from(payload));
            }
        }
    };

    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"))
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "GET"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Content-Type", "multipart/x-mixed-replace; boundary=frame"))
        .streaming(stream)
}

/// Return the page state as JSON.
async fn state_handler(state: web::Data<ServerState>) -> HttpResponse {
    match state.page.lock() {
        Ok(guard) => HttpResponse::Ok().json(&*guard),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

async fn metrics_handler() -> HttpResponse {
    match telemetry::prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::ServiceUnavailable().body("metrics recorder not installed"),
    }
}

async fn control_handler(
    action: web::Path<String>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    let Some(action) = ControlAction::from_name(&action) else {
        return HttpResponse::NotFound().body(format!("unknown control {:?}", action.as_str()));
    };
    debug!(?action, "control requested");
    forward(&state, Event::Control(action))
}

async fn visibility_handler(
    body: web::Json<VisibilityBody>,
    state: web::Data<ServerState>,
) -> HttpResponse {
    forward(&state, Event::Visibility {
        hidden: body.hidden,
    })
}

fn forward(state: &ServerState, event: Event) -> HttpResponse {
    match state.events.send(event) {
        Ok(()) => HttpResponse::Accepted().finish(),
        Err(_) => HttpResponse::ServiceUnavailable().body("client is shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use actix_web::{http::StatusCode, test};
    use crossbeam_channel::{Receiver, unbounded};
    use image::Rgba;

    use super::*;
    use crate::client::{
        data::{DetectionCounts, PageState},
        surface::Surface,
    };

    fn state() -> (ServerState, Receiver<Event>) {
        let (tx, rx) = unbounded();
        let state = ServerState {
            surface: Arc::new(Mutex::new(Surface::default())),
            page: Arc::new(Mutex::new(PageState::default())),
            events: tx,
            jpeg_quality: 80,
        };
        (state, rx)
    }

    macro_rules! service {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn index_serves_control_page() {
        let (state, _rx) = state();
        let app = service!(state);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert!(std::str::from_utf8(&body).unwrap().contains("/stream.mjpg"));
    }

    #[actix_web::test]
    async fn control_posts_are_forwarded() {
        let (state, rx) = state();
        let app = service!(state);
        for (name, expected) in [
            ("start", ControlAction::Start),
            ("stop", ControlAction::Stop),
            ("flip", ControlAction::Flip),
            ("fullscreen", ControlAction::ToggleFullscreen),
        ] {
            let req = test::TestRequest::post()
                .uri(&format!("/control/{name}"))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
            assert!(matches!(rx.try_recv(), Ok(Event::Control(action)) if action == expected));
        }
    }

    #[actix_web::test]
    async fn unknown_control_is_not_found() {
        let (state, rx) = state();
        let app = service!(state);
        let req = test::TestRequest::post().uri("/control/zoom").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(rx.try_recv().is_err());
    }

    #[actix_web::test]
    async fn visibility_changes_are_forwarded() {
        let (state, rx) = state();
        let app = service!(state);
        let req = test::TestRequest::post()
            .uri("/visibility")
            .set_json(serde_json::json!({"hidden": true}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(matches!(rx.try_recv(), Ok(Event::Visibility { hidden: true })));
    }

    #[actix_web::test]
    async fn frame_is_empty_until_surface_sized() {
        let (state, _rx) = state();
        let app = service!(state);
        let req = test::TestRequest::get().uri("/frame.jpg").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

        {
            let mut surface = state.surface.lock().unwrap();
            surface.resize(16, 8);
            surface.draw(&RgbaImage::from_pixel(16, 8, Rgba([200, 10, 10, 255])), false);
        }
        let req = test::TestRequest::get().uri("/frame.jpg").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(&body[..2], &[0xFF, 0xD8]);
    }

    #[actix_web::test]
    async fn state_reports_page_as_json() {
        let (state, _rx) = state();
        state
            .page
            .lock()
            .unwrap()
            .detections
            .render(&DetectionCounts::parse(r#"{"person": 2}"#).unwrap());
        let app = service!(state);
        let req = test::TestRequest::get().uri("/state").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["model_status"], "Loading…");
        assert_eq!(body["controls"]["start"], false);
        assert_eq!(body["facing_mode"], "environment");
        assert_eq!(body["detections"][0]["label"], "person");
        assert_eq!(body["detections"][0]["count"], 2);
    }
}
