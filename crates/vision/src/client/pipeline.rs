//! Client supervisor tying together the status poller, refresh scheduler,
//! submission worker, camera and preview server around the event loop.

use std::{
    net::TcpListener,
    sync::{Arc, Mutex, atomic::Ordering},
};

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use tracing::{info, warn};
use video_ingest::DeviceCamera;

use crate::client::{
    ClientConfig,
    acquire::CameraWorker,
    data::{PageState, SharedPage},
    event::Event,
    inference::{HttpInferenceClient, InferenceApi},
    runner::{install_ctrlc_handler, run_event_loop},
    scheduler::RefreshScheduler,
    server::{ServerState, spawn_preview_server},
    session::Session,
    status::spawn_status_poller,
    submission::SubmissionWorker,
    surface::{SharedSurface, Surface},
    telemetry,
    viewport::PageViewport,
};

/// Run the client until Ctrl+C.
pub fn run(config: ClientConfig) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry, config.verbose);
    if let Err(err) = telemetry::init_metrics_recorder() {
        warn!("Prometheus metrics disabled: {err:#}");
    }
    let client_span = tracing::info_span!(
        "client",
        server = %config.server_url,
        width = config.width,
        height = config.height,
        backend = ?config.backend,
        refresh_hz = config.refresh_hz,
    );
    let _client_span_guard = client_span.enter();

    let shutdown = install_ctrlc_handler();
    let (events_tx, events_rx) = unbounded::<Event>();

    let api: Arc<dyn InferenceApi> = Arc::new(
        HttpInferenceClient::new(&config.server_url, config.request_timeout)
            .context("Failed to build HTTP client")?,
    );
    let page: SharedPage = Arc::new(Mutex::new(PageState::default()));
    let surface: SharedSurface = Arc::new(Mutex::new(Surface::default()));

    let listener = TcpListener::bind(config.bind)
        .with_context(|| format!("Failed to bind preview server on {}", config.bind))?;
    let server = spawn_preview_server(
        listener,
        ServerState {
            surface: surface.clone(),
            page: page.clone(),
            events: events_tx.clone(),
            jpeg_quality: config.jpeg_quality,
        },
    )?;

    let poller = spawn_status_poller(api.clone(), events_tx.clone(), shutdown.clone())
        .context("Failed to spawn status poller")?;
    let scheduler = RefreshScheduler::spawn(config.refresh_hz, events_tx.clone())
        .context("Failed to spawn refresh scheduler")?;
    let submitter = SubmissionWorker::spawn(api, config.jpeg_quality, events_tx.clone())
        .context("Failed to spawn submission worker")?;
    let camera = DeviceCamera::new(config.backend, config.devices.clone())
        .with_first_frame_timeout(config.first_frame_timeout);
    let acquirer = CameraWorker::spawn(Box::new(camera), events_tx)
        .context("Failed to spawn camera worker")?;

    let mut session = Session::new(
        config.session(),
        Box::new(acquirer),
        Box::new(scheduler),
        Box::new(submitter),
        Box::new(PageViewport::default()),
        surface,
        page,
    );

    info!(
        environment = %config.devices.environment,
        user = %config.devices.user,
        "waiting for the detection model"
    );
    run_event_loop(&mut session, &events_rx, &shutdown);

    shutdown.store(true, Ordering::SeqCst);
    server.stop();
    // Joins the camera, scheduler and submission threads.
    drop(session);
    let _ = poller.join();
    info!("client stopped");
    Ok(())
}
