//! Event system for firmware update progress.
//!
//! Lets the CLI (or anything else) follow an update without the session
//! knowing how progress is displayed.

use std::fmt;

/// Firmware update phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// Not started yet.
    Idle,
    /// Sending image segments.
    Download,
    /// Committing the downloaded image.
    Activate,
    /// All requested steps done.
    Complete,
    /// Stopped on an error.
    Error,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePhase::Idle => write!(f, "Idle"),
            UpdatePhase::Download => write!(f, "Download"),
            UpdatePhase::Activate => write!(f, "Activate"),
            UpdatePhase::Complete => write!(f, "Complete"),
            UpdatePhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by a firmware update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    PhaseChanged {
        from: UpdatePhase,
        to: UpdatePhase,
    },
    /// Segment size picked for this image.
    Plan {
        image_len: usize,
        segment_size: usize,
        segments: usize,
    },
    /// One segment accepted by the driver.
    SegmentSent {
        index: usize,
        total: usize,
        offset: u64,
        len: usize,
        return_code: Option<u32>,
    },
    Activated {
        slot: u8,
        action: u8,
        return_code: Option<u32>,
    },
    Error {
        message: String,
    },
    Complete,
}

/// Observer trait for receiving update events.
pub trait UpdateObserver: Send + Sync {
    fn on_event(&self, event: &UpdateEvent);
}

/// Observer that discards all events.
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpdateObserver for TracingObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            UpdateEvent::Plan {
                image_len,
                segment_size,
                segments,
            } => {
                tracing::info!(image_len, segment_size, segments, "Download plan");
            }
            UpdateEvent::SegmentSent {
                index,
                total,
                offset,
                len,
                return_code,
            } => {
                let pct = if *total > 0 { ((index + 1) * 100) / total } else { 0 };
                tracing::debug!(
                    segment = index + 1,
                    total,
                    offset = %format!("0x{:X}", offset),
                    len,
                    return_code = ?return_code,
                    progress = %format!("{}%", pct),
                    "Segment sent"
                );
            }
            UpdateEvent::Activated {
                slot,
                action,
                return_code,
            } => {
                tracing::info!(slot, action, return_code = ?return_code, "Firmware activated");
            }
            UpdateEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            UpdateEvent::Complete => {
                tracing::info!("Update complete");
            }
        }
    }
}
