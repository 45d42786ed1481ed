//! Capture session: owns a frame source, samples it on a timer, keeps the
//! liveness verdict current and answers capture requests.
//!
//! One [`CaptureSession`] per camera. The sampling task is the only writer
//! of the frame buffer; every other accessor takes a snapshot under the
//! state lock. `stop()`, `Drop` and a camera failure during sampling share
//! one teardown that releases the camera exactly once.

use facegate_core::adapter::DetectOptions;
use facegate_core::liveness::{BufferedFrame, NullTexture};
use facegate_core::{
    match_against_candidates, BlinkTracker, Candidate, DetectionAdapter, DetectionResult, Descriptor,
    FaceDetector, FrameBuffer, LivenessAnalyzer, LivenessScore, MatchError, MatchResult, SensitivityConfig,
    SensitivityError, SensitivityLevel, SensitivityProfile, TextureAnalyzer,
};
use facegate_hw::{CameraError, FrameSource};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("liveness check failed: {0}")]
    LivenessCheckFailed(String),
    #[error("camera access denied: {0}")]
    CameraAccessDenied(String),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("face models unavailable: {0}")]
    ModelUnavailable(String),
    #[error("descriptor mismatch: {0}")]
    DescriptorLengthMismatch(#[from] MatchError),
    #[error("session not started")]
    SessionNotStarted,
    #[error("capture task failed: {0}")]
    Internal(String),
}

impl CaptureError {
    /// Stable reason code reported to clients.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoFaceDetected => "NoFaceDetected",
            Self::LivenessCheckFailed(_) => "LivenessCheckFailed",
            Self::CameraAccessDenied(_) => "CameraAccessDenied",
            Self::CameraUnavailable(_) => "CameraUnavailable",
            Self::ModelUnavailable(_) => "ModelUnavailable",
            Self::DescriptorLengthMismatch(_) => "DescriptorLengthMismatch",
            Self::SessionNotStarted => "SessionNotStarted",
            Self::Internal(_) => "Internal",
        }
    }

    /// Camera errors end the session; everything else is per-frame.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CameraAccessDenied(_) | Self::CameraUnavailable(_))
    }
}

impl From<CameraError> for CaptureError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::PermissionDenied(_) => Self::CameraAccessDenied(e.to_string()),
            other => Self::CameraUnavailable(other.to_string()),
        }
    }
}

/// Session lifecycle. `Live` and `NotLive` keep sampling until capture or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Sampling,
    Live,
    NotLive,
    Stopped,
}

/// Detection settings that do not depend on sensitivity.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub sample_interval: Duration,
    pub detect: DetectOptions,
    pub sensitivity: SensitivityLevel,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            detect: DetectOptions::default(),
            sensitivity: SensitivityLevel::default(),
        }
    }
}

/// Result of a successful capture.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub session_id: Uuid,
    pub descriptor: Descriptor,
    pub liveness_score: LivenessScore,
    pub is_live: bool,
    pub blink_detected: bool,
    pub match_result: MatchResult,
}

/// Snapshot of the liveness side of a session.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessStatus {
    pub session_id: Uuid,
    pub state: SessionState,
    pub liveness: Option<LivenessScore>,
    pub blink_detected: bool,
    pub frames_buffered: usize,
    pub frames_sampled: u64,
    pub sensitivity: SensitivityProfile,
    /// Set when a camera failure ended the session, as `"Reason: message"`.
    pub error: Option<String>,
}

struct SourceSlot<S> {
    source: S,
    streaming: bool,
}

struct SessionData {
    phase: SessionState,
    buffer: FrameBuffer,
    blink: BlinkTracker,
    latest: Option<LivenessScore>,
    sensitivity: SensitivityConfig,
    failure: Option<CaptureError>,
}

struct Shared<S, D> {
    id: Uuid,
    source: Mutex<SourceSlot<S>>,
    adapter: Mutex<DetectionAdapter<D>>,
    data: Mutex<SessionData>,
    texture: Box<dyn TextureAnalyzer>,
    detect: DetectOptions,
    active: AtomicBool,
    /// Bumped by every `start`; ticks from an earlier run must not write.
    run: AtomicU64,
    frames_sampled: AtomicU64,
}

/// A panicking tick must not wedge the session; recover the guard.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<S, D> Shared<S, D>
where
    S: FrameSource + 'static,
    D: FaceDetector + Send + 'static,
{
    fn detect_options(&self) -> DetectOptions {
        let profile = lock(&self.data).sensitivity.current();
        DetectOptions {
            min_confidence: profile.min_confidence,
            min_face_size: profile.min_face_size,
            ..self.detect.clone()
        }
    }

    /// Grab one frame and run detection. Blocking.
    fn grab_and_detect(&self) -> Result<Option<(DetectionResult, f32)>, CaptureError> {
        let frame = {
            let mut slot = lock(&self.source);
            if !slot.streaming {
                return Err(CaptureError::SessionNotStarted);
            }
            slot.source.next_frame()?
        };
        let image = frame
            .into_image()
            .ok_or_else(|| CaptureError::Internal("frame size does not match its buffer".into()))?;

        let options = self.detect_options();
        let detection = lock(&self.adapter).detect_face(&image, &options);
        Ok(detection.map(|det| {
            let texture = self.texture.analyze(&image, &det.bounding_box);
            (det, texture)
        }))
    }

    fn is_current(&self, run: u64) -> bool {
        self.active.load(Ordering::SeqCst) && self.run.load(Ordering::SeqCst) == run
    }

    /// One sampling tick. Detection misses leave the state as it was; a
    /// camera failure ends the session.
    fn sample_once(&self) {
        let run = self.run.load(Ordering::SeqCst);
        if !self.is_current(run) {
            return;
        }
        self.frames_sampled.fetch_add(1, Ordering::Relaxed);

        let detection = match self.grab_and_detect() {
            Ok(d) => d,
            Err(e) if e.is_terminal() => {
                self.fail(run, e);
                return;
            }
            Err(e) => {
                tracing::debug!(session = %self.id, error = %e, "sampling tick failed");
                return;
            }
        };

        let mut data = lock(&self.data);
        // Teardown or a restart may have happened while detection was in flight.
        if !self.is_current(run) {
            return;
        }
        let Some((detection, texture_variance)) = detection else {
            tracing::trace!(session = %self.id, "no face in sampled frame");
            return;
        };

        data.buffer.push(BufferedFrame {
            detection,
            texture_variance,
        });
        let profile = data.sensitivity.current();
        let blink_threshold = profile.blink_threshold;
        let SessionData {
            buffer, blink, latest, phase, ..
        } = &mut *data;
        blink.update(buffer, blink_threshold);
        *latest = LivenessAnalyzer::new().evaluate(buffer, &profile);

        let next = match latest {
            Some(score) if score.is_live => SessionState::Live,
            Some(_) => SessionState::NotLive,
            None => SessionState::Sampling,
        };
        let prev = *phase;
        if next != prev {
            tracing::debug!(session = %self.id, from = ?prev, to = ?next, "session state changed");
            *phase = next;
        }
    }

    /// Tear the session down after a camera error and keep the error for callers.
    fn fail(&self, run: u64, error: CaptureError) {
        if !self.is_current(run) {
            return;
        }
        tracing::warn!(session = %self.id, reason = error.reason(), error = %error, "camera failed, stopping session");
        lock(&self.data).failure = Some(error);
        self.teardown();
    }

    /// The one teardown path: deactivate, clear the buffer, release the camera once.
    ///
    /// Blocks while a tick holds the camera for a frame grab.
    fn teardown(&self) {
        self.active.store(false, Ordering::SeqCst);

        {
            let mut data = lock(&self.data);
            data.buffer.clear();
            data.latest = None;
            data.phase = SessionState::Stopped;
        }

        let mut slot = lock(&self.source);
        if slot.streaming {
            slot.streaming = false;
            slot.source.stop();
            tracing::info!(session = %self.id, "camera stopped");
        }
    }
}

async fn sampling_loop<S, D>(shared: Arc<Shared<S, D>>, period: Duration)
where
    S: FrameSource + 'static,
    D: FaceDetector + Send + 'static,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !shared.active.load(Ordering::SeqCst) {
            break;
        }
        let tick = Arc::clone(&shared);
        // Awaited before the next tick, so detections never overlap.
        if let Err(e) = tokio::task::spawn_blocking(move || tick.sample_once()).await {
            tracing::warn!(session = %shared.id, error = %e, "sampling tick panicked");
        }
    }
}

pub struct CaptureSession<S, D>
where
    S: FrameSource + 'static,
    D: FaceDetector + Send + 'static,
{
    shared: Arc<Shared<S, D>>,
    task: Mutex<Option<JoinHandle<()>>>,
    sample_interval: Duration,
}

impl<S, D> CaptureSession<S, D>
where
    S: FrameSource + 'static,
    D: FaceDetector + Send + 'static,
{
    pub fn new(source: S, detector: D, options: SessionOptions) -> Self {
        Self::with_texture(source, detector, options, Box::new(NullTexture))
    }

    pub fn with_texture(
        source: S,
        detector: D,
        options: SessionOptions,
        texture: Box<dyn TextureAnalyzer>,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(session = %id, level = %options.sensitivity, "session created");
        Self {
            shared: Arc::new(Shared {
                id,
                source: Mutex::new(SourceSlot {
                    source,
                    streaming: false,
                }),
                adapter: Mutex::new(DetectionAdapter::new(detector)),
                data: Mutex::new(SessionData {
                    phase: SessionState::Idle,
                    buffer: FrameBuffer::default(),
                    blink: BlinkTracker::new(),
                    latest: None,
                    sensitivity: SensitivityConfig::new(options.sensitivity),
                    failure: None,
                }),
                texture,
                detect: options.detect,
                active: AtomicBool::new(false),
                run: AtomicU64::new(0),
                frames_sampled: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
            sample_interval: options.sample_interval,
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        lock(&self.shared.data).phase
    }

    /// Start the camera and the sampling task. Starting an active session is a no-op.
    pub async fn start(&self) -> Result<(), CaptureError> {
        if self.is_active() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let started = tokio::task::spawn_blocking(move || {
            let mut slot = lock(&shared.source);
            slot.source.start()?;
            slot.streaming = true;
            Ok::<_, CameraError>(())
        })
        .await
        .map_err(|e| CaptureError::Internal(e.to_string()))?;

        if let Err(e) = started {
            tracing::warn!(session = %self.shared.id, error = %e, "camera failed to start");
            self.teardown();
            return Err(e.into());
        }

        {
            let mut data = lock(&self.shared.data);
            data.buffer.clear();
            data.blink.reset();
            data.latest = None;
            data.failure = None;
            data.phase = SessionState::Sampling;
            self.shared.run.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.active.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(sampling_loop(Arc::clone(&self.shared), self.sample_interval));
        if let Some(old) = lock(&self.task).replace(handle) {
            old.abort();
        }

        tracing::info!(
            session = %self.shared.id,
            interval_ms = self.sample_interval.as_millis() as u64,
            "session started"
        );
        Ok(())
    }

    /// Take a fresh frame, require a live verdict and match against `candidates`.
    ///
    /// A failed liveness check leaves the session sampling so the caller can retry.
    pub async fn capture(&self, candidates: Vec<Candidate>, threshold: f32) -> Result<CaptureOutcome, CaptureError> {
        if !self.is_active() {
            let failure = lock(&self.shared.data).failure.clone();
            return Err(failure.unwrap_or(CaptureError::SessionNotStarted));
        }

        let run = self.shared.run.load(Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let detection = tokio::task::spawn_blocking(move || shared.grab_and_detect())
            .await
            .map_err(|e| CaptureError::Internal(e.to_string()))?;
        let detection = match detection {
            Ok(d) => d,
            Err(e) if e.is_terminal() => {
                self.shared.fail(run, e.clone());
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let Some((detection, _)) = detection else {
            return Err(CaptureError::NoFaceDetected);
        };

        let (score, blink_detected) = {
            let data = lock(&self.shared.data);
            (data.latest.clone(), data.blink.detected())
        };
        let score = match score {
            Some(s) if s.is_live => s,
            Some(s) => return Err(CaptureError::LivenessCheckFailed(s.reason)),
            None => return Err(CaptureError::LivenessCheckFailed("not enough frames sampled yet".into())),
        };

        let match_result = match_against_candidates(&detection.descriptor, &candidates, threshold)?;

        tracing::info!(
            session = %self.shared.id,
            candidates = candidates.len(),
            matched = match_result.is_match,
            similarity = match_result.similarity,
            liveness = score.confidence,
            "capture complete"
        );

        Ok(CaptureOutcome {
            session_id: self.shared.id,
            descriptor: detection.descriptor,
            is_live: score.is_live,
            liveness_score: score,
            blink_detected,
            match_result,
        })
    }

    pub fn set_sensitivity(&self, name: &str) -> Result<SensitivityLevel, SensitivityError> {
        lock(&self.shared.data).sensitivity.set_level(name)
    }

    pub fn sensitivity(&self) -> SensitivityProfile {
        lock(&self.shared.data).sensitivity.current()
    }

    pub fn liveness(&self) -> LivenessStatus {
        let data = lock(&self.shared.data);
        LivenessStatus {
            session_id: self.shared.id,
            state: data.phase,
            liveness: data.latest.clone(),
            blink_detected: data.blink.detected(),
            frames_buffered: data.buffer.len(),
            frames_sampled: self.shared.frames_sampled.load(Ordering::Relaxed),
            sensitivity: data.sensitivity.current(),
            error: data
                .failure
                .as_ref()
                .map(|e| format!("{}: {e}", e.reason())),
        }
    }

    /// Stop sampling and release the camera. The release runs on the
    /// blocking pool so an in-flight frame grab does not stall the caller.
    pub async fn stop(&self) {
        if self.is_active() {
            tracing::info!(session = %self.shared.id, "session stopping");
        }
        self.abort_task();
        let shared = Arc::clone(&self.shared);
        if let Err(e) = tokio::task::spawn_blocking(move || shared.teardown()).await {
            tracing::warn!(session = %self.shared.id, error = %e, "teardown task failed");
            self.shared.teardown();
        }
    }

    fn abort_task(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }

    fn teardown(&self) {
        self.abort_task();
        self.shared.teardown();
    }
}

impl<S, D> Drop for CaptureSession<S, D>
where
    S: FrameSource + 'static,
    D: FaceDetector + Send + 'static,
{
    fn drop(&mut self) {
        // Cheap after `stop()`; otherwise may wait for one frame grab.
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::detector::{DetectorError, DetectorModel};
    use facegate_core::types::{BoundingBox, LandmarkSet, Point, DESCRIPTOR_LEN, LANDMARK_COUNT};
    use facegate_hw::Frame;
    use image::RgbaImage;
    use std::sync::atomic::AtomicUsize;

    const TICK: Duration = Duration::from_millis(10);

    /// Camera double counting start/stop calls.
    struct FakeCamera {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        frames: Arc<AtomicUsize>,
        fail_start: Option<fn() -> CameraError>,
        /// Frame grabs fail while set, as if the device was unplugged.
        unplugged: Arc<AtomicBool>,
        running: bool,
    }

    struct Counters {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        frames: Arc<AtomicUsize>,
        unplugged: Arc<AtomicBool>,
    }

    fn fake_camera() -> (FakeCamera, Counters) {
        let counters = Counters {
            starts: Arc::default(),
            stops: Arc::default(),
            frames: Arc::default(),
            unplugged: Arc::default(),
        };
        let cam = FakeCamera {
            starts: Arc::clone(&counters.starts),
            stops: Arc::clone(&counters.stops),
            frames: Arc::clone(&counters.frames),
            fail_start: None,
            unplugged: Arc::clone(&counters.unplugged),
            running: false,
        };
        (cam, counters)
    }

    impl FrameSource for FakeCamera {
        fn start(&mut self) -> Result<(), CameraError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if let Some(fail) = self.fail_start {
                return Err(fail());
            }
            self.running = true;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            if !self.running {
                return Err(CameraError::NotStarted);
            }
            if self.unplugged.load(Ordering::SeqCst) {
                return Err(CameraError::CaptureFailed("device unplugged".into()));
            }
            let seq = self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(Frame {
                data: [120, 110, 100, 255].repeat(64 * 48),
                width: 64,
                height: 48,
                timestamp: std::time::Instant::now(),
                sequence: seq as u32,
                is_dark: false,
            })
        }

        fn stop(&mut self) {
            self.running = false;
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Detector that cycles through a fixed script of results.
    struct Scripted {
        script: Vec<Option<DetectionResult>>,
        next: usize,
    }

    impl Scripted {
        fn new(script: Vec<Option<DetectionResult>>) -> Self {
            Self { script, next: 0 }
        }
    }

    impl FaceDetector for Scripted {
        fn detect(
            &mut self,
            _image: &RgbaImage,
            _model: DetectorModel,
            _min_confidence: f32,
        ) -> Result<Option<DetectionResult>, DetectorError> {
            let out = self.script[self.next % self.script.len()].clone();
            self.next += 1;
            Ok(out)
        }
    }

    /// Detector whose first call blocks until released, then returns a face
    /// far off to the right. Later calls follow `live_script`.
    struct StalledFirst {
        calls: usize,
        entered: Arc<AtomicBool>,
        release: Arc<AtomicBool>,
        finished: Arc<AtomicBool>,
    }

    impl FaceDetector for StalledFirst {
        fn detect(
            &mut self,
            _image: &RgbaImage,
            _model: DetectorModel,
            _min_confidence: f32,
        ) -> Result<Option<DetectionResult>, DetectorError> {
            self.calls += 1;
            if self.calls == 1 {
                self.entered.store(true, Ordering::SeqCst);
                while !self.release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(2));
                }
                self.finished.store(true, Ordering::SeqCst);
                return Ok(Some(face(0.3, STALE_OFFSET)));
            }
            Ok(Some(face(0.3, (self.calls % 2) as f32 * 2.0)))
        }
    }

    const STALE_OFFSET: f32 = 500.0;

    fn eye(cx: f32, h: f32) -> [Point; 6] {
        [
            Point::new(cx - 10.0, 90.0),
            Point::new(cx - 4.0, 90.0 - h),
            Point::new(cx + 4.0, 90.0 - h),
            Point::new(cx + 10.0, 90.0),
            Point::new(cx + 4.0, 90.0 + h),
            Point::new(cx - 4.0, 90.0 + h),
        ]
    }

    /// Lopsided face with eye aspect ratio `ear`, translated by `dx`.
    fn face(ear: f32, dx: f32) -> DetectionResult {
        let mut points: [Point; LANDMARK_COUNT] =
            std::array::from_fn(|i| Point::new(100.0 + 2.0 * i as f32, 100.0 + i as f32));
        points[30] = Point::new(100.0, 130.0);
        points[36..42].copy_from_slice(&eye(80.0, ear * 10.0));
        points[42..48].copy_from_slice(&eye(120.0, ear * 10.0));
        for p in points.iter_mut() {
            p.x += dx;
        }
        DetectionResult {
            bounding_box: BoundingBox {
                x: 20.0 + dx,
                y: 40.0,
                width: 150.0,
                height: 150.0,
            },
            landmarks: LandmarkSet::new(points),
            descriptor: Descriptor::new(vec![0.05; DESCRIPTOR_LEN]),
            confidence: 0.9,
        }
    }

    fn live_script() -> Vec<Option<DetectionResult>> {
        (0..4).map(|i| Some(face(0.3, (i % 2) as f32 * 2.0))).collect()
    }

    fn options() -> SessionOptions {
        SessionOptions {
            sample_interval: TICK,
            ..SessionOptions::default()
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_live_face_reaches_live_state() {
        let (cam, _) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        assert_eq!(session.state(), SessionState::Idle);

        session.start().await.unwrap();
        assert!(wait_for(|| session.state() == SessionState::Live).await);

        let status = session.liveness();
        assert!(status.liveness.unwrap().is_live);
        assert!(status.frames_buffered >= 3);
        session.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capture_matches_candidate() {
        let (cam, _) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        session.start().await.unwrap();
        assert!(wait_for(|| session.state() == SessionState::Live).await);

        let candidates = vec![
            Candidate {
                id: "stranger".into(),
                descriptor: Descriptor::new(vec![0.9; DESCRIPTOR_LEN]),
            },
            Candidate {
                id: "alice".into(),
                descriptor: Descriptor::new(vec![0.05; DESCRIPTOR_LEN]),
            },
        ];
        let outcome = session.capture(candidates, 0.4).await.unwrap();
        assert!(outcome.is_live);
        assert!(outcome.match_result.is_match);
        assert_eq!(outcome.match_result.matched_candidate_id.as_deref(), Some("alice"));
        assert_eq!(outcome.session_id, session.id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capture_rejects_mismatched_candidate() {
        let (cam, _) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        session.start().await.unwrap();
        assert!(wait_for(|| session.state() == SessionState::Live).await);

        let bad = vec![Candidate {
            id: "short".into(),
            descriptor: Descriptor::new(vec![0.0; 16]),
        }];
        let err = session.capture(bad, 0.4).await.unwrap_err();
        assert_eq!(err.reason(), "DescriptorLengthMismatch");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_static_closed_eyes_fails_liveness_and_keeps_sampling() {
        let (cam, counters) = fake_camera();
        let still = vec![Some(face(0.1, 0.0))];
        let session = CaptureSession::new(cam, Scripted::new(still), options());
        session.start().await.unwrap();
        assert!(wait_for(|| session.state() == SessionState::NotLive).await);

        let err = session.capture(Vec::new(), 0.4).await.unwrap_err();
        assert!(matches!(err, CaptureError::LivenessCheckFailed(_)));
        assert!(session.is_active());

        let before = counters.frames.load(Ordering::SeqCst);
        assert!(wait_for(|| counters.frames.load(Ordering::SeqCst) > before).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_capture_without_face() {
        let (cam, _) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(vec![None]), options());
        session.start().await.unwrap();
        let err = session.capture(Vec::new(), 0.4).await.unwrap_err();
        assert_eq!(err.reason(), "NoFaceDetected");
    }

    #[tokio::test]
    async fn test_capture_before_start() {
        let (cam, _) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        let err = session.capture(Vec::new(), 0.4).await.unwrap_err();
        assert!(matches!(err, CaptureError::SessionNotStarted));
    }

    #[tokio::test]
    async fn test_permission_denied_maps_and_tears_down() {
        let (mut cam, counters) = fake_camera();
        cam.fail_start = Some(|| CameraError::PermissionDenied("/dev/video0".into()));
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());

        let err = session.start().await.unwrap_err();
        assert_eq!(err.reason(), "CameraAccessDenied");
        assert!(!session.is_active());
        assert_eq!(session.state(), SessionState::Stopped);
        // Never started streaming, so nothing to release.
        assert_eq!(counters.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_busy_camera_is_unavailable() {
        let (mut cam, _) = fake_camera();
        cam.fail_start = Some(|| CameraError::DeviceBusy);
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        assert_eq!(session.start().await.unwrap_err().reason(), "CameraUnavailable");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_freezes_buffer_and_stops_camera_once() {
        let (cam, counters) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        session.start().await.unwrap();
        assert!(wait_for(|| session.liveness().frames_buffered >= 3).await);

        session.stop().await;
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.liveness().frames_buffered, 0);

        let frames = counters.frames.load(Ordering::SeqCst);
        tokio::time::sleep(TICK * 10).await;
        assert_eq!(session.liveness().frames_buffered, 0);
        assert_eq!(counters.frames.load(Ordering::SeqCst), frames);

        session.stop().await;
        drop(session);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_releases_camera() {
        let (cam, counters) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        session.start().await.unwrap();
        drop(session);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_clears_blink_and_buffer() {
        let (cam, counters) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        session.start().await.unwrap();
        assert!(wait_for(|| session.liveness().frames_buffered >= 3).await);
        session.stop().await;

        session.start().await.unwrap();
        assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
        assert!(session.is_active());
        session.stop().await;
        assert_eq!(counters.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_camera_failure_mid_session_tears_down() {
        let (cam, counters) = fake_camera();
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        session.start().await.unwrap();
        assert!(wait_for(|| session.state() == SessionState::Live).await);

        counters.unplugged.store(true, Ordering::SeqCst);
        assert!(wait_for(|| !session.is_active()).await);
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);

        let status = session.liveness();
        assert!(status.liveness.is_none());
        assert_eq!(status.frames_buffered, 0);
        assert!(status.error.unwrap().starts_with("CameraUnavailable"));

        let err = session.capture(Vec::new(), 0.4).await.unwrap_err();
        assert_eq!(err.reason(), "CameraUnavailable");

        // No more grabs after the failure, and stop/drop do not release twice.
        let frames = counters.frames.load(Ordering::SeqCst);
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(counters.frames.load(Ordering::SeqCst), frames);
        session.stop().await;
        drop(session);
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_restart_clears_previous_failure() {
        let (cam, counters) = fake_camera();
        counters.unplugged.store(true, Ordering::SeqCst);
        let session = CaptureSession::new(cam, Scripted::new(live_script()), options());
        session.start().await.unwrap();
        assert!(wait_for(|| !session.is_active()).await);
        assert!(session.liveness().error.is_some());

        counters.unplugged.store(false, Ordering::SeqCst);
        session.start().await.unwrap();
        assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
        assert!(wait_for(|| session.liveness().frames_buffered >= 1).await);
        assert!(session.is_active());
        assert!(session.liveness().error.is_none());
        session.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tick_from_previous_run_is_discarded() {
        let (cam, _) = fake_camera();
        let entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let detector = StalledFirst {
            calls: 0,
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
            finished: Arc::clone(&finished),
        };
        let session = CaptureSession::new(cam, detector, options());
        session.start().await.unwrap();
        assert!(wait_for(|| entered.load(Ordering::SeqCst)).await);

        // Restart while the first detection is still in flight.
        session.stop().await;
        session.start().await.unwrap();
        release.store(true, Ordering::SeqCst);
        assert!(wait_for(|| finished.load(Ordering::SeqCst)).await);
        assert!(wait_for(|| session.liveness().frames_buffered >= 3).await);

        let data = lock(&session.shared.data);
        assert!(data
            .buffer
            .iter()
            .all(|f| f.detection.bounding_box.x < STALE_OFFSET));
    }

    #[tokio::test]
    async fn test_sensitivity_is_per_session() {
        let (cam_a, _) = fake_camera();
        let (cam_b, _) = fake_camera();
        let a = CaptureSession::new(cam_a, Scripted::new(live_script()), options());
        let b = CaptureSession::new(cam_b, Scripted::new(live_script()), options());

        assert_eq!(a.set_sensitivity("high").unwrap(), SensitivityLevel::High);
        assert_eq!(a.sensitivity().liveness_threshold, 0.70);
        assert_eq!(b.sensitivity().liveness_threshold, 0.50);

        assert!(a.set_sensitivity("bogus").is_err());
        assert_eq!(a.sensitivity().level, SensitivityLevel::High);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(CaptureError::NoFaceDetected.reason(), "NoFaceDetected");
        assert_eq!(
            CaptureError::ModelUnavailable("x".into()).reason(),
            "ModelUnavailable"
        );
        let e: CaptureError = CameraError::PermissionDenied("/dev/video0".into()).into();
        assert_eq!(e.reason(), "CameraAccessDenied");
    }
}
