//! Timed calls into the localizer and the detector.
//!
//! Each probe runs on its own thread and is awaited against a deadline. A
//! probe that misses its deadline is abandoned: its thread finishes in the
//! background and the late answer is dropped. A [`ProbeGate`] bounds how many
//! such threads can be outstanding; past the limit new probes fail at once
//! instead of spawning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::detect::{filter_by_confidence, Detection, DetectorBackend};
use crate::frame::Frame;
use crate::locate::{LocateError, Localizer, Region};

/// Raw outcome of a timed call.
#[derive(Debug)]
pub enum ProbeOutcome<T> {
    Completed(T),
    TimedOut,
    Failed(String),
}

/// Calls that may still be running on a worker thread at once.
pub const DEFAULT_MAX_OUTSTANDING: usize = 8;

/// Counts probe threads that have not finished yet.
///
/// A thread counts from spawn until its call returns (or panics), so threads
/// left behind by timed-out calls keep holding a slot until they finish.
#[derive(Clone, Debug)]
pub struct ProbeGate {
    in_flight: Arc<AtomicUsize>,
    limit: usize,
}

impl Default for ProbeGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTSTANDING)
    }
}

impl ProbeGate {
    pub fn new(limit: usize) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            limit,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Option<Slot> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()
            .map(|_| Slot(Arc::clone(&self.in_flight)))
    }
}

struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a call running on a worker thread.
pub struct Probe<T> {
    rx: Option<Receiver<T>>,
    spawn_error: Option<String>,
}

impl<T: Send + 'static> Probe<T> {
    pub fn spawn<F>(gate: &ProbeGate, name: &str, f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let Some(slot) = gate.acquire() else {
            return Self::failed(format!(
                "{} not started: {} earlier calls still running",
                name, gate.limit
            ));
        };
        let (tx, rx) = mpsc::sync_channel(1);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let value = f();
                drop(slot);
                let _ = tx.send(value);
            });
        match spawned {
            Ok(_) => Self {
                rx: Some(rx),
                spawn_error: None,
            },
            Err(err) => Self::failed(format!("failed to spawn {}: {}", name, err)),
        }
    }

    fn failed(msg: String) -> Self {
        Self {
            rx: None,
            spawn_error: Some(msg),
        }
    }

    /// Wait until `deadline` for the result.
    pub fn wait(self, deadline: Instant) -> ProbeOutcome<T> {
        let Some(rx) = self.rx else {
            return ProbeOutcome::Failed(self.spawn_error.unwrap_or_default());
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(value) => ProbeOutcome::Completed(value),
            Err(RecvTimeoutError::Timeout) => ProbeOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                ProbeOutcome::Failed("probe thread exited without a result".to_string())
            }
        }
    }
}

/// Localizer outcome for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
    Visible(Region),
    Missing(LocateError),
    TimedOut,
    Failed(String),
}

impl Presence {
    pub fn is_visible(&self) -> bool {
        matches!(self, Presence::Visible(_))
    }
}

/// Detector outcome for one frame, already confidence-filtered.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Detections(Vec<Detection>),
    DetectorFailure(String),
    TimedOut,
}

impl Prediction {
    /// Detections to emit. Failures and timeouts emit none.
    pub fn into_detections(self) -> Vec<Detection> {
        match self {
            Prediction::Detections(d) => d,
            Prediction::DetectorFailure(_) | Prediction::TimedOut => Vec::new(),
        }
    }
}

pub fn spawn_locate(
    gate: &ProbeGate,
    localizer: &Arc<dyn Localizer>,
    frame: &Frame,
) -> Probe<Result<Region, LocateError>> {
    let localizer = Arc::clone(localizer);
    let frame = frame.clone();
    Probe::spawn(gate, "minimap-locate", move || localizer.locate(&frame))
}

pub fn spawn_detect(
    gate: &ProbeGate,
    detector: &Arc<dyn DetectorBackend>,
    frame_id: &str,
    crop: RgbImage,
) -> Probe<anyhow::Result<Vec<Detection>>> {
    let detector = Arc::clone(detector);
    let frame_id = frame_id.to_string();
    Probe::spawn(gate, "minimap-detect", move || detector.detect(&frame_id, &crop))
}

pub fn presence(outcome: ProbeOutcome<Result<Region, LocateError>>) -> Presence {
    match outcome {
        ProbeOutcome::Completed(Ok(region)) => Presence::Visible(region),
        ProbeOutcome::Completed(Err(err)) => Presence::Missing(err),
        ProbeOutcome::TimedOut => Presence::TimedOut,
        ProbeOutcome::Failed(msg) => Presence::Failed(msg),
    }
}

pub fn prediction(outcome: ProbeOutcome<anyhow::Result<Vec<Detection>>>, threshold: f32) -> Prediction {
    match outcome {
        ProbeOutcome::Completed(Ok(raw)) => Prediction::Detections(filter_by_confidence(raw, threshold)),
        ProbeOutcome::Completed(Err(err)) => Prediction::DetectorFailure(format!("{:#}", err)),
        ProbeOutcome::TimedOut => Prediction::TimedOut,
        ProbeOutcome::Failed(msg) => Prediction::DetectorFailure(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_idle(gate: &ProbeGate) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while gate.in_flight() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn completed_call_returns_value() {
        let gate = ProbeGate::default();
        let probe = Probe::spawn(&gate, "t", || 7);
        match probe.wait(Instant::now() + Duration::from_secs(5)) {
            ProbeOutcome::Completed(v) => assert_eq!(v, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn slow_call_times_out() {
        let probe = Probe::spawn(&ProbeGate::default(), "t", || {
            std::thread::sleep(Duration::from_millis(500));
            1
        });
        assert!(matches!(
            probe.wait(Instant::now() + Duration::from_millis(20)),
            ProbeOutcome::TimedOut
        ));
    }

    #[test]
    fn panicking_call_fails() {
        let gate = ProbeGate::default();
        let probe: Probe<u8> = Probe::spawn(&gate, "t", || panic!("boom"));
        assert!(matches!(
            probe.wait(Instant::now() + Duration::from_secs(5)),
            ProbeOutcome::Failed(_)
        ));
        wait_idle(&gate);
    }

    #[test]
    fn finished_calls_release_their_slot() {
        let gate = ProbeGate::new(1);
        for i in 0..3 {
            match Probe::spawn(&gate, "t", move || i).wait(Instant::now() + Duration::from_secs(5)) {
                ProbeOutcome::Completed(v) => assert_eq!(v, i),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn stalled_calls_stop_new_spawns_until_they_finish() {
        let gate = ProbeGate::new(2);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(std::sync::Mutex::new(release_rx));
        for _ in 0..2 {
            let rx = Arc::clone(&release_rx);
            let stalled = Probe::spawn(&gate, "t", move || {
                let _ = rx.lock().map(|rx| rx.recv());
            });
            assert!(matches!(
                stalled.wait(Instant::now() + Duration::from_millis(20)),
                ProbeOutcome::TimedOut
            ));
        }
        assert_eq!(gate.in_flight(), 2);

        let refused = Probe::spawn(&gate, "t", || 1u8);
        match refused.wait(Instant::now() + Duration::from_secs(5)) {
            ProbeOutcome::Failed(msg) => assert!(msg.contains("still running"), "{msg}"),
            other => panic!("unexpected {:?}", other),
        }

        drop(release_tx);
        wait_idle(&gate);
        assert!(matches!(
            Probe::spawn(&gate, "t", || 2u8).wait(Instant::now() + Duration::from_secs(5)),
            ProbeOutcome::Completed(2)
        ));
    }

    #[test]
    fn detector_errors_become_empty_predictions() {
        let p = prediction(ProbeOutcome::Completed(Err(anyhow::anyhow!("down"))), 0.5);
        assert_eq!(p, Prediction::DetectorFailure("down".to_string()));
        assert!(p.into_detections().is_empty());
    }
}
