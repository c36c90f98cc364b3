//! Webcam client that streams frames to a detection server and renders the
//! annotated results.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Wires the workers and servers around the event loop.
//! - `runner`: The single-threaded event loop.
//! - `session`: Camera lifecycle, frame loop and result application.
//! - `acquire`: Camera acquisition on a worker thread.
//! - `scheduler`: Display-refresh callbacks for the frame loop.
//! - `submission`: Background `/process` round trips.
//! - `status`: Model readiness polling.
//! - `inference`: HTTP client and response classification.
//! - `surface`: Render surface and JPEG encoding.
//! - `fps`: Smoothed frame-rate meter.
//! - `data`: Detection counts and page state.
//! - `server`: Actix Web control page and preview endpoints.
//! - `viewport`: Fullscreen handling.

/// Re-export client settings so callers can configure runs without reaching
/// into submodules.
pub use config::{CaptureBackendArg, ClientCliArgs, ClientConfig, TelemetryOptions};
/// Launch the client with a ready-made configuration.
pub use pipeline::run;

pub mod acquire;
pub mod config;
pub mod data;
pub mod error;
pub mod event;
pub mod fps;
pub mod inference;
pub mod runner;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod submission;
pub mod surface;
pub mod viewport;

mod html;
mod pipeline;
mod server;
mod telemetry;
