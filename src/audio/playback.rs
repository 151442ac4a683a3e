//! Gapless playback scheduling and rendering
//!
//! The [`PlaybackScheduler`] owns the output timeline: every decoded chunk is
//! assigned an absolute start time so consecutive chunks render back to back
//! with no gap and no overlap. `flush()` implements barge-in: all chunks that
//! have not started are cancelled in one pass and the timeline cursor resets
//! to "now". The chunk already handed to the renderer is allowed to finish.
//!
//! The [`AudioPlayback`] renderer owns the cpal output stream for the
//! session's lifetime and pulls samples from the scheduler's queue inside the
//! device callback; decoding and timeline math never happen on that callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::audio::device::get_output_device;
use crate::clock::SampleClock;
use crate::error::AudioError;

const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// A decoded frame pinned to the output timeline.
#[derive(Debug, Clone)]
pub struct ScheduledChunk {
    pub samples: Vec<f32>,
    /// Absolute start time on the output timeline
    pub start: Duration,
    pub duration: Duration,
}

impl ScheduledChunk {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Timeline state shared between the scheduler and the renderer callback.
struct Timeline {
    /// Chunks not yet started, in schedule order
    queued: VecDeque<ScheduledChunk>,
    /// Chunk currently being rendered, with its sample cursor
    current: Option<(ScheduledChunk, usize)>,
    /// Where the next chunk will be placed
    next_start: Duration,
    /// Chunks scheduled since creation
    chunks_scheduled: u64,
    /// Times the queue drained before new audio arrived
    underruns: u64,
    /// Chunks cancelled by flushes
    chunks_flushed: u64,
}

impl Timeline {
    fn new() -> Self {
        Self {
            queued: VecDeque::new(),
            current: None,
            next_start: Duration::ZERO,
            chunks_scheduled: 0,
            underruns: 0,
            chunks_flushed: 0,
        }
    }
}

/// Owner of the gapless output timeline.
///
/// Clones share the same timeline; the renderer holds one clone and consumes
/// from the queue while the downlink task schedules into it.
#[derive(Clone)]
pub struct PlaybackScheduler {
    clock: Arc<dyn SampleClock>,
    timeline: Arc<Mutex<Timeline>>,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn SampleClock>) -> Self {
        Self {
            clock,
            timeline: Arc::new(Mutex::new(Timeline::new())),
        }
    }

    /// Queue a decoded frame at the earliest gapless position.
    ///
    /// Start time is `max(next_playback_time, now)`. A cursor that has fallen
    /// behind the clock means the queue drained (underrun); that resets the
    /// cursor to "now" and is counted, not treated as an error.
    ///
    /// Returns the assigned start time.
    pub fn schedule(&self, frame: AudioFrame) -> Duration {
        let duration = frame.duration();
        let now = self.clock.now();
        let mut tl = self.timeline.lock();

        if tl.chunks_scheduled > 0 && tl.next_start < now {
            tl.underruns += 1;
            tracing::debug!(
                cursor_ms = tl.next_start.as_millis() as u64,
                now_ms = now.as_millis() as u64,
                "Playback underrun, restarting timeline at now"
            );
        }

        let start = tl.next_start.max(now);
        tl.next_start = start + duration;
        tl.chunks_scheduled += 1;
        tl.queued.push_back(ScheduledChunk {
            samples: frame.samples,
            start,
            duration,
        });

        start
    }

    /// Cancel every chunk that has not started and reset the cursor to "now".
    ///
    /// Cost is O(queued chunks); no device or network I/O happens under the
    /// lock. The chunk already being rendered finishes on its own.
    pub fn flush(&self) {
        let now = self.clock.now();
        let mut tl = self.timeline.lock();

        let cancelled = tl.queued.len() as u64;
        tl.queued.clear();
        tl.chunks_flushed += cancelled;
        tl.next_start = now;

        tracing::debug!(cancelled, "Playback queue flushed");
    }

    /// Fill an output buffer with scheduled samples, in order.
    ///
    /// Called from the render callback; emits silence once the queue drains.
    /// The lock is held only for the copy.
    pub fn fill(&self, out: &mut [f32]) {
        let mut tl = self.timeline.lock();
        let mut written = 0;

        while written < out.len() {
            if tl.current.is_none() {
                tl.current = tl.queued.pop_front().map(|c| (c, 0));
            }

            let Some((chunk, cursor)) = tl.current.as_mut() else {
                break;
            };

            let remaining = chunk.samples.len() - *cursor;
            let take = remaining.min(out.len() - written);
            out[written..written + take]
                .copy_from_slice(&chunk.samples[*cursor..*cursor + take]);
            *cursor += take;
            written += take;

            if *cursor == chunk.samples.len() {
                tl.current = None;
            }
        }

        out[written..].fill(0.0);
    }

    /// Current value of the timeline cursor.
    pub fn next_playback_time(&self) -> Duration {
        self.timeline.lock().next_start
    }

    /// Chunks queued but not yet started.
    pub fn queued_chunks(&self) -> usize {
        self.timeline.lock().queued.len()
    }

    /// Times the queue drained before new audio arrived.
    pub fn underrun_count(&self) -> u64 {
        self.timeline.lock().underruns
    }

    /// Chunks cancelled by flushes.
    pub fn flushed_count(&self) -> u64 {
        self.timeline.lock().chunks_flushed
    }
}

/// Renderer feeding the output device from a [`PlaybackScheduler`].
///
/// Exclusive owner of the output device between `start()` and `stop()`.
pub struct AudioPlayback {
    device_name: Option<String>,
    sample_rate: u32,
    scheduler: PlaybackScheduler,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    pub fn new(
        device_name: Option<String>,
        sample_rate: u32,
        scheduler: PlaybackScheduler,
    ) -> Self {
        Self {
            device_name,
            sample_rate,
            scheduler,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Open the output device and start rendering.
    ///
    /// Same thread-and-ready-channel shape as capture: the stream lives on
    /// its own thread and build failures surface here synchronously.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_output_device(self.device_name.as_deref())?;
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let scheduler = self.scheduler.clone();
        let sample_rate = self.sample_rate;

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voice-playback".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }
                        scheduler.fill(data);
                    },
                    move |err| {
                        tracing::error!("Playback stream error: {}", err);
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }

                        // Stream is dropped here, releasing the device
                    }
                    Err(e) => {
                        let _ = ready_tx
                            .send(Err(AudioError::DeviceUnavailable(e.to_string())));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv_timeout(STREAM_OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                self.thread_handle = Some(handle);
                tracing::debug!(sample_rate, "Playback started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(AudioError::StreamError(
                    "timed out waiting for playback stream".to_string(),
                ))
            }
        }
    }

    /// Stop rendering. Idempotent; releases the output device.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Playback stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn chunk_500ms() -> AudioFrame {
        // 500 ms at 24 kHz mono
        AudioFrame::new(vec![0.1; 12_000], 24_000)
    }

    fn scheduler() -> (ManualClock, PlaybackScheduler) {
        crate::test_util::init_tracing();
        let clock = ManualClock::new();
        let scheduler = PlaybackScheduler::new(Arc::new(clock.clone()));
        (clock, scheduler)
    }

    #[test]
    fn test_back_to_back_chunks_are_gapless() {
        let (_clock, scheduler) = scheduler();

        let s1 = scheduler.schedule(chunk_500ms());
        let s2 = scheduler.schedule(chunk_500ms());
        let s3 = scheduler.schedule(chunk_500ms());

        assert_eq!(s1, Duration::ZERO);
        assert_eq!(s2, Duration::from_millis(500));
        assert_eq!(s3, Duration::from_millis(1000));
        // total span exactly 1500 ms, zero overlap
        assert_eq!(scheduler.next_playback_time(), Duration::from_millis(1500));
    }

    #[test]
    fn test_consecutive_chunks_never_overlap() {
        let (clock, scheduler) = scheduler();

        let mut prev_end = Duration::ZERO;
        for i in 0..20 {
            // Jittery arrival: sometimes the clock races ahead of the cursor
            if i % 5 == 4 {
                clock.advance(Duration::from_millis(700));
            } else {
                clock.advance(Duration::from_millis(100));
            }
            let start = scheduler.schedule(chunk_500ms());
            assert!(start >= prev_end, "chunk {i} overlaps its predecessor");
            prev_end = start + Duration::from_millis(500);
        }
    }

    #[test]
    fn test_underrun_resets_cursor_to_now() {
        let (clock, scheduler) = scheduler();

        scheduler.schedule(chunk_500ms());
        assert_eq!(scheduler.underrun_count(), 0);

        // Queue drains: the clock passes the cursor before the next chunk
        clock.set(Duration::from_millis(800));
        let start = scheduler.schedule(chunk_500ms());

        assert_eq!(start, Duration::from_millis(800));
        assert_eq!(scheduler.next_playback_time(), Duration::from_millis(1300));
        assert_eq!(scheduler.underrun_count(), 1);
    }

    #[test]
    fn test_first_chunk_is_not_an_underrun() {
        let (clock, scheduler) = scheduler();
        clock.set(Duration::from_millis(250));

        scheduler.schedule(chunk_500ms());
        assert_eq!(scheduler.underrun_count(), 0);
    }

    #[test]
    fn test_flush_cancels_queue_and_resets_cursor() {
        let (clock, scheduler) = scheduler();

        scheduler.schedule(chunk_500ms());
        scheduler.schedule(chunk_500ms());
        scheduler.schedule(chunk_500ms());
        assert_eq!(scheduler.queued_chunks(), 3);

        clock.set(Duration::from_millis(200));
        scheduler.flush();

        assert_eq!(scheduler.queued_chunks(), 0);
        assert_eq!(scheduler.flushed_count(), 3);
        assert_eq!(scheduler.next_playback_time(), Duration::from_millis(200));
    }

    #[test]
    fn test_interruption_mid_chunk_lets_current_finish() {
        let (clock, scheduler) = scheduler();

        // Chunks with distinct sample values so the renderer output is traceable
        scheduler.schedule(AudioFrame::new(vec![1.0; 1000], 24_000));
        scheduler.schedule(AudioFrame::new(vec![2.0; 1000], 24_000));
        scheduler.schedule(AudioFrame::new(vec![3.0; 1000], 24_000));

        // Chunk 1 starts rendering
        let mut out = vec![0.0f32; 400];
        scheduler.fill(&mut out);
        assert!(out.iter().all(|&s| s == 1.0));

        // Barge-in while chunks 2 and 3 are still queued
        clock.set(Duration::from_millis(17));
        scheduler.flush();

        // The rest of chunk 1 finishes, then silence; chunks 2 and 3 never start
        let mut out = vec![0.0f32; 1000];
        scheduler.fill(&mut out);
        assert!(out[..600].iter().all(|&s| s == 1.0));
        assert!(out[600..].iter().all(|&s| s == 0.0));

        assert_eq!(scheduler.next_playback_time(), clock.now());
    }

    #[test]
    fn test_fill_spans_chunk_boundaries_gaplessly() {
        let (_clock, scheduler) = scheduler();

        scheduler.schedule(AudioFrame::new(vec![1.0; 300], 24_000));
        scheduler.schedule(AudioFrame::new(vec![2.0; 300], 24_000));

        let mut out = vec![0.0f32; 500];
        scheduler.fill(&mut out);

        assert!(out[..300].iter().all(|&s| s == 1.0));
        assert!(out[300..].iter().all(|&s| s == 2.0));
    }

    #[test]
    fn test_fill_emits_silence_when_empty() {
        let (_clock, scheduler) = scheduler();

        let mut out = vec![0.7f32; 128];
        scheduler.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_cursor_is_monotone_without_flush() {
        let (clock, scheduler) = scheduler();

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            clock.advance(Duration::from_millis(133));
            scheduler.schedule(chunk_500ms());
            let cursor = scheduler.next_playback_time();
            assert!(cursor >= last);
            last = cursor;
        }
    }
}
