//! Session orchestration
//!
//! Wires capture, codec, transport and playback together and owns the
//! lifecycle state machine. Two pipelines run concurrently once connected:
//! the uplink task drains the capture ring buffer, meters, encodes and
//! sends; the downlink task decodes backend audio onto the playback
//! timeline and services barge-in.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::audio::capture::CaptureStage;
use crate::audio::meter::VolumeMeter;
use crate::audio::playback::{AudioPlayback, PlaybackScheduler};
use crate::clock::MonotonicClock;
use crate::codec::pcm::{PcmDecoder, PcmEncoder};
use crate::config::SessionConfig;
use crate::constants::{RING_BUFFER_CAPACITY, UPLINK_POLL_INTERVAL_US};
use crate::error::{Error, Result};
use crate::session::state::{SessionState, StateCell};
use crate::transport::{ws, TransportEvent, TransportLink};

/// Volume hook: smoothed RMS in [0, 1], one update per captured frame.
pub type VolumeCallback = Box<dyn Fn(f32) + Send + Sync>;

/// Close hook: `None` for a normal close, the error otherwise.
pub type CloseCallback = Box<dyn Fn(Option<Error>) + Send + Sync>;

/// Caller-facing event hooks.
#[derive(Default)]
pub struct SessionHooks {
    pub on_volume: Option<VolumeCallback>,
    pub on_close: Option<CloseCallback>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_volume(mut self, f: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.on_volume = Some(Box::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(Option<Error>) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }
}

/// Device-owning stages, released together on every exit path.
struct SessionResources {
    capture: CaptureStage,
    playback: AudioPlayback,
}

type SharedResources = Arc<Mutex<Option<SessionResources>>>;

/// Release everything a session holds, in contract order: stop capture,
/// flush the playback queue, close the transport, release the output
/// device. Safe to call from any state and any number of times.
fn teardown(
    resources: &SharedResources,
    scheduler: &PlaybackScheduler,
    link: &Arc<dyn TransportLink>,
) {
    if let Some(mut res) = resources.lock().take() {
        res.capture.stop();
        scheduler.flush();
        link.close();
        res.playback.stop();
    } else {
        // Devices already released; the transport close is idempotent
        link.close();
    }
}

/// A live full-duplex voice session.
pub struct SessionController {
    id: Uuid,
    state: Arc<StateCell>,
    scheduler: PlaybackScheduler,
    link: Arc<dyn TransportLink>,
    resources: SharedResources,
    running: Arc<AtomicBool>,
    uplink_task: Option<JoinHandle<()>>,
    downlink_task: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Connect a new session: acquire both audio devices, handshake with the
    /// backend, then start streaming.
    ///
    /// Acquisition is rolled back on every failure path; an error here never
    /// leaves a device held.
    pub async fn connect(config: SessionConfig, hooks: SessionHooks) -> Result<Self> {
        config.validate()?;

        let id = Uuid::new_v4();
        let state = Arc::new(StateCell::new());
        state.transition(SessionState::Connecting)?;

        tracing::info!(session = %id, endpoint = %config.endpoint, "Connecting session");

        // Input device
        let ring = create_shared_buffer(RING_BUFFER_CAPACITY);
        let mut capture = CaptureStage::new(
            config.input_device.clone(),
            config.input_sample_rate,
            config.capture_frame_samples,
            ring.clone(),
        );
        if let Err(e) = capture.start() {
            let _ = state.transition(SessionState::Error);
            return Err(e.into());
        }

        // Output device
        let scheduler = PlaybackScheduler::new(Arc::new(MonotonicClock::new()));
        let mut playback = AudioPlayback::new(
            config.output_device.clone(),
            config.output_sample_rate,
            scheduler.clone(),
        );
        if let Err(e) = playback.start() {
            capture.stop();
            let _ = state.transition(SessionState::Error);
            return Err(e.into());
        }

        // Backend handshake
        let (transport, events) = match ws::connect(&config).await {
            Ok(pair) => pair,
            Err(e) => {
                capture.stop();
                playback.stop();
                let _ = state.transition(SessionState::Error);
                return Err(e.into());
            }
        };
        let link: Arc<dyn TransportLink> = Arc::new(transport);

        state.transition(SessionState::Streaming)?;
        tracing::info!(session = %id, "Session streaming");

        let resources: SharedResources =
            Arc::new(Mutex::new(Some(SessionResources { capture, playback })));
        let running = Arc::new(AtomicBool::new(true));

        let uplink_task = tokio::spawn(run_uplink(
            ring,
            VolumeMeter::new(config.meter_smoothing),
            PcmEncoder::new(),
            link.clone(),
            running.clone(),
            hooks.on_volume,
        ));

        let downlink_task = tokio::spawn(run_downlink(
            events,
            PcmDecoder::new(config.output_sample_rate),
            scheduler.clone(),
            state.clone(),
            resources.clone(),
            link.clone(),
            running.clone(),
            hooks.on_close,
        ));

        Ok(Self {
            id,
            state,
            scheduler,
            link,
            resources,
            running,
            uplink_task: Some(uplink_task),
            downlink_task: Some(downlink_task),
        })
    }

    /// End the session and release everything it holds. Idempotent; safe
    /// from any state, including after a remote close or error.
    pub fn disconnect(&mut self) {
        if self.state.get() == SessionState::Closed {
            return;
        }

        // May be rejected when the downlink already moved to Error; the
        // teardown below runs regardless.
        let _ = self.state.transition(SessionState::Closing);

        self.running.store(false, Ordering::SeqCst);
        teardown(&self.resources, &self.scheduler, &self.link);

        let _ = self.state.transition(SessionState::Closed);

        if let Some(task) = self.uplink_task.take() {
            task.abort();
        }
        if let Some(task) = self.downlink_task.take() {
            task.abort();
        }

        tracing::info!(session = %self.id, "Session disconnected");
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Uplink frames dropped while the link was not streaming.
    pub fn dropped_frames(&self) -> u64 {
        self.link.dropped_frames()
    }

    /// Playback underruns observed so far.
    pub fn underrun_count(&self) -> u64 {
        self.scheduler.underrun_count()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Uplink pipeline: capture ring buffer → meter → PCM encode → transport.
///
/// Polls the lock-free buffer with a short sleep; the capture callback never
/// waits on this task.
async fn run_uplink(
    buffer: SharedRingBuffer,
    mut meter: VolumeMeter,
    mut encoder: PcmEncoder,
    link: Arc<dyn TransportLink>,
    running: Arc<AtomicBool>,
    on_volume: Option<VolumeCallback>,
) {
    while running.load(Ordering::Relaxed) {
        while let Some(frame) = buffer.try_pop() {
            meter.measure(&frame);
            if let Some(cb) = &on_volume {
                cb(meter.smoothed());
            }

            let payload = encoder.encode(&frame);
            link.send_audio(payload);
        }

        tokio::time::sleep(Duration::from_micros(UPLINK_POLL_INTERVAL_US)).await;
    }

    tracing::debug!(
        frames = encoder.frames_encoded(),
        dropped = link.dropped_frames(),
        "Uplink stopped"
    );
}

/// Downlink pipeline: transport events → PCM decode → playback timeline.
///
/// A corrupt chunk is dropped and the session continues. `Interrupted`
/// flushes the queue before the next scheduled chunk would start. Remote
/// close and transport errors run the full teardown and fire `on_close`.
#[allow(clippy::too_many_arguments)]
async fn run_downlink(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut decoder: PcmDecoder,
    scheduler: PlaybackScheduler,
    state: Arc<StateCell>,
    resources: SharedResources,
    link: Arc<dyn TransportLink>,
    running: Arc<AtomicBool>,
    on_close: Option<CloseCallback>,
) {
    let mut close_error: Option<Error> = None;

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Audio(payload) => match decoder.decode(&payload) {
                Ok(frame) => {
                    scheduler.schedule(frame);
                }
                Err(e) => {
                    tracing::warn!("Dropping corrupt audio chunk: {}", e);
                }
            },
            TransportEvent::Interrupted => {
                let _ = state.transition(SessionState::Interrupting);
                scheduler.flush();
                let _ = state.transition(SessionState::Streaming);
                tracing::debug!("Barge-in: playback queue flushed");
            }
            TransportEvent::Closed => {
                tracing::info!("Remote closed the session");
                break;
            }
            TransportEvent::Error(e) => {
                tracing::error!("Transport error: {}", e);
                close_error = Some(e.into());
                break;
            }
        }
    }

    // A local disconnect() already tore the session down and moved it to
    // Closed; only remote-initiated exits are handled here.
    let local_close = matches!(
        state.get(),
        SessionState::Closing | SessionState::Closed
    );
    if !local_close {
        if close_error.is_some() {
            let _ = state.transition(SessionState::Error);
        } else {
            let _ = state.transition(SessionState::Closing);
        }

        running.store(false, Ordering::SeqCst);
        teardown(&resources, &scheduler, &link);

        let _ = state.transition(SessionState::Closed);

        if let Some(cb) = &on_close {
            cb(close_error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioFrame;
    use crate::clock::ManualClock;
    use crate::error::TransportError;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::sync::atomic::AtomicU64;

    /// In-memory transport link recording every uplink payload.
    struct MockLink {
        streaming: AtomicBool,
        sent: Mutex<Vec<String>>,
        dropped: AtomicU64,
        closed: AtomicBool,
    }

    impl MockLink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                streaming: AtomicBool::new(true),
                sent: Mutex::new(Vec::new()),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            })
        }
    }

    impl TransportLink for MockLink {
        fn send_audio(&self, payload: String) {
            if !self.streaming.load(Ordering::SeqCst) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.sent.lock().push(payload);
        }

        fn close(&self) {
            self.streaming.store(false, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_streaming(&self) -> bool {
            self.streaming.load(Ordering::SeqCst)
        }

        fn dropped_frames(&self) -> u64 {
            self.dropped.load(Ordering::Relaxed)
        }
    }

    fn streaming_state() -> Arc<StateCell> {
        crate::test_util::init_tracing();
        let state = Arc::new(StateCell::new());
        state.transition(SessionState::Connecting).unwrap();
        state.transition(SessionState::Streaming).unwrap();
        state
    }

    fn pcm_payload(samples: &[f32]) -> String {
        PcmEncoder::new().encode(&AudioFrame::new(samples.to_vec(), 24_000))
    }

    #[tokio::test]
    async fn test_downlink_schedules_decoded_audio() {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = ManualClock::new();
        let scheduler = PlaybackScheduler::new(Arc::new(clock));
        let state = streaming_state();
        let link: Arc<dyn TransportLink> = MockLink::new();

        tx.send(TransportEvent::Audio(pcm_payload(&[0.5; 12_000])))
            .unwrap();
        tx.send(TransportEvent::Audio(pcm_payload(&[0.5; 12_000])))
            .unwrap();
        tx.send(TransportEvent::Audio(pcm_payload(&[0.5; 12_000])))
            .unwrap();
        tx.send(TransportEvent::Closed).unwrap();

        run_downlink(
            rx,
            PcmDecoder::new(24_000),
            scheduler.clone(),
            state.clone(),
            Arc::new(Mutex::new(None)),
            link,
            Arc::new(AtomicBool::new(true)),
            None,
        )
        .await;

        // 3 × 500 ms back to back: span exactly 1500 ms
        assert_eq!(scheduler.next_playback_time(), Duration::from_millis(1500));
        assert_eq!(state.get(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_downlink_interruption_flushes_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        let clock = ManualClock::new();
        let scheduler = PlaybackScheduler::new(Arc::new(clock.clone()));
        let state = streaming_state();
        let link: Arc<dyn TransportLink> = MockLink::new();

        tx.send(TransportEvent::Audio(pcm_payload(&[0.5; 12_000])))
            .unwrap();
        tx.send(TransportEvent::Audio(pcm_payload(&[0.5; 12_000])))
            .unwrap();
        tx.send(TransportEvent::Audio(pcm_payload(&[0.5; 12_000])))
            .unwrap();

        clock.set(Duration::from_millis(120));
        tx.send(TransportEvent::Interrupted).unwrap();
        tx.send(TransportEvent::Closed).unwrap();

        run_downlink(
            rx,
            PcmDecoder::new(24_000),
            scheduler.clone(),
            state.clone(),
            Arc::new(Mutex::new(None)),
            link,
            Arc::new(AtomicBool::new(true)),
            None,
        )
        .await;

        // Queued chunks cancelled, cursor reset to the flush time
        assert_eq!(scheduler.queued_chunks(), 0);
        assert_eq!(scheduler.next_playback_time(), Duration::from_millis(120));
        assert_eq!(scheduler.flushed_count(), 3);
    }

    #[tokio::test]
    async fn test_downlink_corrupt_chunk_is_dropped_session_continues() {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(Arc::new(ManualClock::new()));
        let state = streaming_state();
        let link: Arc<dyn TransportLink> = MockLink::new();

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();

        // Odd byte count: corrupt
        tx.send(TransportEvent::Audio(BASE64.encode([1u8, 2, 3])))
            .unwrap();
        // A valid chunk after the corrupt one must still play
        tx.send(TransportEvent::Audio(pcm_payload(&[0.5; 240])))
            .unwrap();
        tx.send(TransportEvent::Closed).unwrap();

        run_downlink(
            rx,
            PcmDecoder::new(24_000),
            scheduler.clone(),
            state.clone(),
            Arc::new(Mutex::new(None)),
            link,
            Arc::new(AtomicBool::new(true)),
            Some(Box::new(move |err| {
                closed_flag.store(true, Ordering::SeqCst);
                assert!(err.is_none(), "corruption must not surface as an error");
            })),
        )
        .await;

        assert_eq!(scheduler.next_playback_time(), Duration::from_millis(10));
        // Corruption alone never triggers disconnect; the close came from
        // the explicit Closed event
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_downlink_transport_error_moves_to_error_then_closed() {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(Arc::new(ManualClock::new()));
        let state = streaming_state();
        let link = MockLink::new();

        tx.send(TransportEvent::Error(TransportError::ConnectionLost(
            "reset".to_string(),
        )))
        .unwrap();

        let reported = Arc::new(AtomicBool::new(false));
        let reported_flag = reported.clone();
        let dyn_link: Arc<dyn TransportLink> = link.clone();

        run_downlink(
            rx,
            PcmDecoder::new(24_000),
            scheduler,
            state.clone(),
            Arc::new(Mutex::new(None)),
            dyn_link,
            Arc::new(AtomicBool::new(true)),
            Some(Box::new(move |err| {
                assert!(matches!(err, Some(Error::Transport(_))));
                reported_flag.store(true, Ordering::SeqCst);
            })),
        )
        .await;

        assert_eq!(state.get(), SessionState::Closed);
        assert!(reported.load(Ordering::SeqCst));
        // Teardown closed the transport on the error path too
        assert!(link.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_uplink_meters_encodes_and_sends() {
        let ring = create_shared_buffer(8);
        let link = MockLink::new();
        let running = Arc::new(AtomicBool::new(true));

        let volume_updates = Arc::new(AtomicU64::new(0));
        let updates = volume_updates.clone();

        ring.push(AudioFrame::new(vec![0.25; 4096], 16_000));
        ring.push(AudioFrame::new(vec![0.25; 4096], 16_000));

        let dyn_link: Arc<dyn TransportLink> = link.clone();
        let task = tokio::spawn(run_uplink(
            ring,
            VolumeMeter::new(0.8),
            PcmEncoder::new(),
            dyn_link,
            running.clone(),
            Some(Box::new(move |v| {
                assert!((0.0..=1.0).contains(&v));
                updates.fetch_add(1, Ordering::Relaxed);
            })),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        running.store(false, Ordering::SeqCst);
        task.await.unwrap();

        let sent = link.sent.lock();
        assert_eq!(sent.len(), 2);
        // 4096 samples × 2 bytes, base64: 4 chars per 3 bytes
        assert_eq!(sent[0].len(), 8192_usize.div_ceil(3) * 4);
        assert_eq!(volume_updates.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_uplink_drops_when_link_not_streaming() {
        let ring = create_shared_buffer(8);
        let link = MockLink::new();
        link.close();
        let running = Arc::new(AtomicBool::new(true));

        ring.push(AudioFrame::new(vec![0.1; 1024], 16_000));

        let dyn_link: Arc<dyn TransportLink> = link.clone();
        let task = tokio::spawn(run_uplink(
            ring,
            VolumeMeter::new(0.8),
            PcmEncoder::new(),
            dyn_link,
            running.clone(),
            None,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        running.store(false, Ordering::SeqCst);
        task.await.unwrap();

        assert!(link.sent.lock().is_empty());
        assert_eq!(link.dropped_frames(), 1);
    }

    #[test]
    fn test_teardown_is_idempotent_and_closes_link() {
        let scheduler = PlaybackScheduler::new(Arc::new(ManualClock::new()));
        let resources: SharedResources = Arc::new(Mutex::new(None));
        let link = MockLink::new();
        let dyn_link: Arc<dyn TransportLink> = link.clone();

        teardown(&resources, &scheduler, &dyn_link);
        teardown(&resources, &scheduler, &dyn_link);

        assert!(link.closed.load(Ordering::SeqCst));
        assert!(!link.is_streaming());
    }

    #[tokio::test]
    async fn test_connect_with_bad_config_fails_fast() {
        let result =
            SessionController::connect(SessionConfig::default(), SessionHooks::new()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
