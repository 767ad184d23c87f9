//! Capture loop: one OS thread pulling frames from the camera at device
//! rate and publishing the newest complete frame into a single-slot watch
//! channel.
//!
//! The decision loop clones a snapshot out of the slot before processing,
//! so the capture thread can overwrite the slot freely while a tick is in
//! flight; a reader only ever sees a complete frame. A camera failure
//! drops the sender, which the decision loop observes as a closed slot
//! and treats as a stop signal for the whole client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use lectern_hw::{Camera, CameraError, Frame};
use tokio::sync::watch;

/// Spawn the capture loop on a dedicated OS thread. The camera is owned
/// by the thread and released when it exits.
pub fn spawn_capture(
    camera: Camera,
    frames: watch::Sender<Option<Frame>>,
    shutdown: Arc<AtomicBool>,
    warmup_frames: usize,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("lectern-capture".into())
        .spawn(move || {
            if let Err(err) = run_capture(&camera, &frames, &shutdown, warmup_frames) {
                tracing::error!(
                    device = %camera.device_path,
                    error = %err,
                    "capture loop failed; stopping client"
                );
            }
            tracing::info!("capture loop exiting");
            // the sender drops here; the engine sees the closed slot
        })
}

fn run_capture(
    camera: &Camera,
    frames: &watch::Sender<Option<Frame>>,
    shutdown: &AtomicBool,
    warmup_frames: usize,
) -> Result<(), CameraError> {
    let mut stream = camera.stream()?;

    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        stream.discard(warmup_frames);
    }

    while !shutdown.load(Ordering::Relaxed) {
        let frame = stream.next_frame()?;
        // newest-wins: an unread frame in the slot is simply replaced
        frames.send_replace(Some(frame));
    }
    Ok(())
}
