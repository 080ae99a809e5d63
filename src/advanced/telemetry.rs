//! Telemetry overlay: capture a frame, stamp the current angle and speed on
//! it, show it.
//!
//! Everything here is best-effort. `capture_frame` must not block: a source
//! with nothing ready returns `None` and the tick proceeds without telemetry.
//! `OffloadedVideo` moves presentation onto its own thread behind a bounded
//! channel; when the display falls behind, frames are dropped, never waited on.

use std::{
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam::channel::{Sender, TrySendError, bounded};
use log::{debug, info, warn};

use crate::error::PeripheralError;

const DISPLAY_QUEUE: usize = 2;

#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub captured_at: Instant,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub overlay: Vec<String>,
}

impl Frame {
    pub fn blank(seq: u64, width: u32, height: u32) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            width,
            height,
            pixels: Vec::new(),
            overlay: Vec::new(),
        }
    }
}

/// Text stamped on each frame.
pub fn overlay_text(pitch_degrees: f64, speed: f64) -> String {
    format!("angle: {:+.2} deg  speed: {:+.2}", pitch_degrees, speed)
}

/// Video collaborator seen by the scheduler.
pub trait VideoSink: Send {
    /// `false` if the capture device could not be opened.
    fn is_open(&self) -> bool {
        true
    }

    /// Non-blocking; `None` when no frame is ready.
    fn capture_frame(&mut self) -> Option<Frame>;

    fn annotate(&mut self, frame: &mut Frame, text: &str) {
        frame.overlay.push(text.to_string());
    }

    fn display(&mut self, frame: Frame) -> Result<(), PeripheralError>;

    fn release_capture(&mut self) -> Result<(), PeripheralError>;

    fn teardown_display(&mut self) -> Result<(), PeripheralError>;
}

/// Camera side of `OffloadedVideo`.
pub trait FrameSource: Send {
    fn is_open(&self) -> bool;

    fn capture(&mut self) -> Option<Frame>;

    fn release(&mut self) -> Result<(), PeripheralError>;
}

/// Display side; runs on the display thread.
pub trait FrameSurface: Send + 'static {
    fn show(&mut self, frame: &Frame);

    fn close(&mut self) {}
}

/// Capture on the control thread, presentation on a display thread.
pub struct OffloadedVideo<S: FrameSource> {
    source: S,
    tx: Option<Sender<Frame>>,
    handle: Option<JoinHandle<()>>,
    dropped: u64,
}

impl<S: FrameSource> OffloadedVideo<S> {
    pub fn spawn<D: FrameSurface>(source: S, mut surface: D) -> Result<Self, PeripheralError> {
        let (tx, rx) = bounded::<Frame>(DISPLAY_QUEUE);
        let handle = thread::Builder::new()
            .name("display".into())
            .spawn(move || {
                // Runs until the sender is dropped in teardown_display.
                while let Ok(frame) = rx.recv() {
                    surface.show(&frame);
                }
                surface.close();
                debug!("display thread stopped");
            })
            .map_err(|e| PeripheralError::bus("spawn_display", 0, e.to_string()))?;

        Ok(Self {
            source,
            tx: Some(tx),
            handle: Some(handle),
            dropped: 0,
        })
    }

    /// Frames discarded because the display was busy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

impl<S: FrameSource> VideoSink for OffloadedVideo<S> {
    fn is_open(&self) -> bool {
        self.source.is_open()
    }

    fn capture_frame(&mut self) -> Option<Frame> {
        self.source.capture()
    }

    fn display(&mut self, frame: Frame) -> Result<(), PeripheralError> {
        let Some(tx) = &self.tx else {
            return Err(PeripheralError::bus("display", 0, "display torn down"));
        };
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(PeripheralError::bus("display", 0, "display thread gone")),
        }
    }

    fn release_capture(&mut self) -> Result<(), PeripheralError> {
        self.source.release()
    }

    fn teardown_display(&mut self) -> Result<(), PeripheralError> {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("display thread panicked");
                return Err(PeripheralError::bus("teardown_display", 0, "display thread panicked"));
            }
        }
        if self.dropped > 0 {
            info!("display dropped {} frames", self.dropped);
        }
        Ok(())
    }
}

impl<S: FrameSource> Drop for OffloadedVideo<S> {
    fn drop(&mut self) {
        let _ = self.teardown_display();
    }
}
