//! Kiosk session lifecycle.
//!
//! A [`KioskSession`] owns its frame source, face encoder and the enrolled
//! gallery used for matching. The source is released when the session is
//! dropped, which covers `stop()`, task abort, errors and panics alike.

use crate::source::{FaceEncoder, FrameSource, KioskError};
use rollcall_core::{
    Aggregator, CheckinRequest, Descriptor, EnrolledFace, EuclideanMatcher, Match, MatchOutcome,
    Matcher, StudentKey, DEFAULT_MATCH_THRESHOLD, DEFAULT_MIN_SAMPLES, DESCRIPTOR_LEN,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Single-face samples averaged into one enrollment descriptor.
    pub min_samples: usize,
    /// Frames examined before enrollment capture gives up.
    pub max_enroll_frames: usize,
    /// Delay between detection attempts in the check-in loop.
    pub poll_interval: Duration,
    pub match_threshold: f32,
    pub dimension: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            max_enroll_frames: 30,
            poll_interval: Duration::from_millis(500),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            dimension: DESCRIPTOR_LEN,
        }
    }
}

/// A face recognized by the check-in loop, ready to submit for admission.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckinCandidate {
    pub student_id: StudentKey,
    pub name: String,
    pub course: String,
    pub confidence: f32,
    pub distance: f32,
}

impl From<Match> for CheckinCandidate {
    fn from(m: Match) -> Self {
        Self {
            student_id: m.student_id,
            name: m.name,
            course: m.course,
            confidence: m.confidence,
            distance: m.distance,
        }
    }
}

impl CheckinCandidate {
    pub fn into_request(self) -> CheckinRequest {
        CheckinRequest {
            student_id: self.student_id,
            name: self.name,
            course: self.course,
            confidence: Some(self.confidence),
        }
    }
}

/// Releases the source when dropped.
struct SourceGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.source.release();
        tracing::debug!("frame source released");
    }
}

pub struct KioskSession<S: FrameSource, E: FaceEncoder> {
    source: SourceGuard<S>,
    encoder: Arc<E>,
    gallery: Vec<EnrolledFace>,
    config: SessionConfig,
}

impl<S: FrameSource, E: FaceEncoder> KioskSession<S, E> {
    pub fn start(source: S, encoder: E, config: SessionConfig) -> Self {
        tracing::info!(
            min_samples = config.min_samples,
            poll_ms = config.poll_interval.as_millis() as u64,
            "kiosk session started"
        );
        Self {
            source: SourceGuard { source },
            encoder: Arc::new(encoder),
            gallery: Vec::new(),
            config,
        }
    }

    /// Replace the cached gallery (e.g. after fetching `/students/descriptors`).
    pub fn set_gallery(&mut self, gallery: Vec<EnrolledFace>) {
        tracing::debug!(entries = gallery.len(), "gallery loaded");
        self.gallery = gallery;
    }

    pub fn gallery(&self) -> &[EnrolledFace] {
        &self.gallery
    }

    /// Collect single-face samples and average them into an enrollment descriptor.
    ///
    /// Frames with no face or several faces are skipped.
    pub fn capture_enrollment(&mut self) -> Result<Descriptor, KioskError> {
        let required = self.config.min_samples.max(1);
        let mut samples = Vec::with_capacity(required);
        let mut frames = 0;

        while frames < self.config.max_enroll_frames && samples.len() < required {
            let Some(frame) = self.source.source.next_frame()? else {
                break;
            };
            frames += 1;

            let mut faces = self.encoder.encode(&frame)?;
            if faces.len() != 1 {
                tracing::debug!(faces = faces.len(), sequence = frame.sequence, "enroll: frame skipped");
                continue;
            }
            let face = faces.remove(0);
            face.validate(self.config.dimension)?;
            samples.push(face);
        }

        if samples.len() < required {
            return Err(KioskError::NotEnoughSamples {
                captured: samples.len(),
                required,
                frames,
            });
        }

        tracing::info!(samples = samples.len(), frames, "enroll: samples captured");
        Ok(Aggregator::new(required, self.config.dimension).average(&samples)?)
    }

    /// Grab one frame and match it. `None` when the frame does not hold exactly
    /// one usable face.
    pub fn identify_once(&mut self) -> Result<Option<MatchOutcome>, KioskError> {
        let frame = self
            .source
            .source
            .next_frame()?
            .ok_or(KioskError::SourceExhausted)?;
        let faces = self.encoder.encode(&frame)?;
        let [probe] = faces.as_slice() else {
            return Ok(None);
        };
        if let Err(e) = probe.validate(self.config.dimension) {
            tracing::warn!(error = %e, sequence = frame.sequence, "identify: encoder output rejected");
            return Ok(None);
        }
        let outcome = EuclideanMatcher.compare(probe, &self.gallery, self.config.match_threshold)?;
        Ok(Some(outcome))
    }

    /// Move the session into a repeating check-in task.
    ///
    /// Each recognized student is sent on `tx` once per session. Frame capture
    /// and encoding block, so every tick runs on the blocking pool. The task
    /// runs until [`CheckinLoop::stop`], the receiver closes, or the source fails.
    pub fn start_checkin(self, tx: mpsc::Sender<CheckinCandidate>) -> CheckinLoop<S, E> {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let mut session = self;

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(session.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut reported: HashSet<StudentKey> = HashSet::new();

            loop {
                tokio::select! {
                    _ = &mut stop_rx => return Ok(Some(session)),
                    _ = ticker.tick() => {}
                }

                let mut frame_task = tokio::task::spawn_blocking(move || {
                    let outcome = session.identify_once();
                    (session, outcome)
                });
                let (returned, outcome) = tokio::select! {
                    _ = &mut stop_rx => {
                        // The in-flight frame keeps the session; it is dropped,
                        // and the source released, once that frame returns.
                        tracing::debug!("check-in loop stopped with a frame in flight");
                        return Ok(None);
                    }
                    joined = &mut frame_task => match joined {
                        Ok(pair) => pair,
                        Err(e) => return Err(KioskError::Task(e.to_string())),
                    },
                };
                session = returned;

                match outcome {
                    Ok(Some(MatchOutcome::Matched(m))) => {
                        if !reported.insert(m.student_id.clone()) {
                            continue;
                        }
                        tracing::info!(student_id = %m.student_id, confidence = m.confidence, "face recognized");
                        if tx.send(CheckinCandidate::from(m)).await.is_err() {
                            tracing::debug!("check-in receiver closed");
                            return Ok(Some(session));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "check-in loop stopped");
                        return Err(e);
                    }
                }
            }
        });

        CheckinLoop {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }

    /// End the session and release the source.
    pub fn stop(self) {
        tracing::info!("kiosk session stopped");
    }
}

/// Handle to a running check-in task. Dropping it aborts the task.
pub struct CheckinLoop<S: FrameSource, E: FaceEncoder> {
    stop_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<Result<Option<KioskSession<S, E>>, KioskError>>>,
}

impl<S: FrameSource, E: FaceEncoder> CheckinLoop<S, E> {
    /// Cancel the loop without waiting for a frame in flight.
    ///
    /// Returns the session when the loop was idle between frames. `None` means
    /// a frame was still being captured; its source is released when it returns.
    pub async fn stop(mut self) -> Result<Option<KioskSession<S, E>>, KioskError> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let Some(join) = self.join.take() else {
            return Err(KioskError::Task("check-in loop already stopped".into()));
        };
        join.await.map_err(|e| KioskError::Task(e.to_string()))?
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl<S: FrameSource, E: FaceEncoder> Drop for CheckinLoop<S, E> {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}
