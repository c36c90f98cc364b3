//! Configuration parsing for the detection client.
//!
//! This module owns translation of CLI arguments into a `ClientConfig` struct
//! which the rest of the client uses without re-parsing flags.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use video_ingest::{CaptureBackend, DeviceMap, FIRST_FRAME_TIMEOUT};

use crate::client::{session::SessionConfig, surface::DEFAULT_JPEG_QUALITY};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
/// Reader used to pull frames from the capture devices.
pub enum CaptureBackendArg {
    /// Spawn `ffmpeg` and read raw BGR frames from its stdout.
    Ffmpeg,
    /// Use OpenCV's `VideoCapture` (requires the `opencv` feature).
    Opencv,
}

impl From<CaptureBackendArg> for CaptureBackend {
    fn from(value: CaptureBackendArg) -> Self {
        match value {
            CaptureBackendArg::Ffmpeg => CaptureBackend::Ffmpeg,
            CaptureBackendArg::Opencv => CaptureBackend::OpenCv,
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the client.
pub struct ClientConfig {
    /// Base URL of the detection server, without trailing slash.
    pub server_url: String,
    /// Device opened for each facing mode.
    pub devices: DeviceMap,
    pub backend: CaptureBackend,
    /// Time a freshly opened camera gets to deliver its first frame.
    pub first_frame_timeout: Duration,
    /// Ideal capture width requested from the device.
    pub width: i32,
    /// Ideal capture height requested from the device.
    pub height: i32,
    /// JPEG quality for submitted frames.
    pub jpeg_quality: u8,
    /// Rate of the display-refresh ticker.
    pub refresh_hz: u32,
    /// Address the preview/control server listens on.
    pub bind: SocketAddr,
    pub request_timeout: Duration,
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

impl ClientConfig {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            ideal_width: self.width,
            ideal_height: self.height,
        }
    }
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing client spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// CLI arguments accepted by the client.
#[derive(Debug, Args)]
pub struct ClientCliArgs {
    /// Base URL of the detection server.
    #[arg(long = "server", value_name = "URL", default_value = "http://127.0.0.1:5000")]
    pub server: String,
    /// Device used for the rear (environment) camera.
    #[arg(long = "environment-device", value_name = "URI", default_value = "/dev/video0")]
    pub environment_device: String,
    /// Device used for the front (user) camera.
    #[arg(long = "user-device", value_name = "URI", default_value = "/dev/video1")]
    pub user_device: String,
    /// Capture reader implementation.
    #[arg(long = "backend", value_enum, default_value_t = CaptureBackendArg::Ffmpeg)]
    pub backend: CaptureBackendArg,
    /// Time a freshly opened camera gets to deliver its first frame.
    #[arg(long = "first-frame-timeout-ms", value_name = "MS", default_value_t = FIRST_FRAME_TIMEOUT.as_millis() as u64)]
    pub first_frame_timeout_ms: u64,
    /// Ideal capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 1280)]
    pub width: i32,
    /// Ideal capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 720)]
    pub height: i32,
    /// JPEG quality used for submitted frames (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = DEFAULT_JPEG_QUALITY)]
    pub jpeg_quality: u8,
    /// Display refresh rate driving the frame loop.
    #[arg(long = "refresh-hz", value_name = "HZ", default_value_t = 60)]
    pub refresh_hz: u32,
    /// Address for the preview and control server.
    #[arg(long = "bind", value_name = "ADDR", default_value = "127.0.0.1:8080")]
    pub bind: String,
    /// Timeout for each HTTP request to the detection server.
    #[arg(long = "request-timeout-ms", value_name = "MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,
    /// Enable verbose logging.
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

impl TryFrom<ClientCliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: ClientCliArgs) -> Result<Self> {
        let server_url = args.server.trim().trim_end_matches('/').to_string();
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            bail!("--server must be an http:// or https:// URL, got {server_url:?}");
        }
        if args.width <= 0 {
            bail!("--width must be a positive integer");
        }
        if args.height <= 0 {
            bail!("--height must be a positive integer");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if args.refresh_hz == 0 {
            bail!("--refresh-hz must be at least 1");
        }
        if args.first_frame_timeout_ms == 0 {
            bail!("--first-frame-timeout-ms must be at least 1");
        }
        if args.request_timeout_ms == 0 {
            bail!("--request-timeout-ms must be at least 1");
        }
        let bind = args
            .bind
            .parse::<SocketAddr>()
            .with_context(|| format!("--bind must be a socket address, got {:?}", args.bind))?;

        Ok(Self {
            server_url,
            devices: DeviceMap {
                environment: args.environment_device,
                user: args.user_device,
            },
            backend: args.backend.into(),
            first_frame_timeout: Duration::from_millis(args.first_frame_timeout_ms),
            width: args.width,
            height: args.height,
            jpeg_quality: args.jpeg_quality,
            refresh_hz: args.refresh_hz,
            bind,
            request_timeout: Duration::from_millis(args.request_timeout_ms),
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ClientCliArgs,
    }

    fn parse(argv: &[&str]) -> Result<ClientConfig> {
        let cli = TestCli::try_parse_from(std::iter::once("webcam-detect").chain(argv.iter().copied()))?;
        ClientConfig::try_from(cli.args)
    }

    #[test]
    fn defaults_cover_a_local_server() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server_url, "http://127.0.0.1:5000");
        assert_eq!(config.devices, DeviceMap::default());
        assert_eq!(config.backend, CaptureBackend::Ffmpeg);
        assert_eq!(config.first_frame_timeout, Duration::from_secs(5));
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.jpeg_quality, 80);
        assert_eq!(config.refresh_hz, 60);
        assert_eq!(config.bind, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.telemetry.chrome_trace_path.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--server",
            "https://detector.local:8443/",
            "--user-device",
            "/dev/video4",
            "--backend",
            "opencv",
            "--first-frame-timeout-ms",
            "1500",
            "--width",
            "640",
            "--height",
            "480",
            "--jpeg-quality",
            "95",
            "--chrome-trace",
            "trace.json",
        ])
        .unwrap();
        assert_eq!(config.server_url, "https://detector.local:8443");
        assert_eq!(config.devices.user, "/dev/video4");
        assert_eq!(config.backend, CaptureBackend::OpenCv);
        assert_eq!(config.first_frame_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.session(),
            SessionConfig {
                ideal_width: 640,
                ideal_height: 480
            }
        );
        assert_eq!(config.jpeg_quality, 95);
        assert_eq!(
            config.telemetry.chrome_trace_path,
            Some(PathBuf::from("trace.json"))
        );
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse(&["--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--jpeg-quality", "101"]).is_err());
        assert!(parse(&["--width", "0"]).is_err());
        assert!(parse(&["--refresh-hz", "0"]).is_err());
        assert!(parse(&["--request-timeout-ms", "0"]).is_err());
        assert!(parse(&["--first-frame-timeout-ms", "0"]).is_err());
        assert!(parse(&["--server", "ftp://example.com"]).is_err());
        assert!(parse(&["--bind", "localhost"]).is_err());
    }
}
