//! The event loop driving a [`Session`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info};

use crate::client::{event::Event, session::Session};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Handle events one at a time until shutdown, then release the camera.
pub fn run_event_loop(session: &mut Session, events: &Receiver<Event>, shutdown: &AtomicBool) {
    let span = tracing::info_span!("client.events");
    let _guard = span.enter();

    while !shutdown.load(Ordering::SeqCst) {
        match events.recv_timeout(SHUTDOWN_POLL) {
            Ok(Event::Shutdown) => {
                debug!("shutdown event received");
                break;
            }
            Ok(event) => session.handle(event),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    session.stop(true);
    info!("event loop finished");
}

/// Shutdown flag raised by Ctrl+C.
pub fn install_ctrlc_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        handler_shutdown.store(true, Ordering::SeqCst);
    }) {
        tracing::warn!("Failed to install Ctrl+C handler: {err}");
    }
    shutdown
}
