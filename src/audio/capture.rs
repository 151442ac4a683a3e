//! Microphone capture stage
//!
//! Runs the cpal input stream on a dedicated thread for low latency. The
//! stream callback only accumulates samples and hands fixed-size frames to
//! the ring buffer; it never touches the network or blocks.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, SharedRingBuffer};
use crate::audio::device::get_input_device;
use crate::error::AudioError;

/// How long `start()` waits for the stream thread to report readiness
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

/// Continuous microphone capture producing fixed-size mono frames.
pub struct CaptureStage {
    /// Device name, or None for the system default
    device_name: Option<String>,

    /// Capture sample rate in Hz
    sample_rate: u32,

    /// Samples per produced frame
    frame_samples: usize,

    /// Whether capture is running
    running: Arc<AtomicBool>,

    /// Output buffer for captured frames
    output_buffer: SharedRingBuffer,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Total frames produced
    frames_captured: Arc<AtomicU64>,
}

impl CaptureStage {
    pub fn new(
        device_name: Option<String>,
        sample_rate: u32,
        frame_samples: usize,
        output_buffer: SharedRingBuffer,
    ) -> Self {
        Self {
            device_name,
            sample_rate,
            frame_samples,
            running: Arc::new(AtomicBool::new(false)),
            output_buffer,
            thread_handle: None,
            frames_captured: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start capturing.
    ///
    /// The cpal stream is built on its own thread (streams are not Send on
    /// every platform); the build result is reported back through a channel
    /// so device failures surface here, before any frame is produced. On
    /// failure nothing is left acquired.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_input_device(self.device_name.as_deref())?;
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let output_buffer = self.output_buffer.clone();
        let frames_captured = self.frames_captured.clone();
        let sample_rate = self.sample_rate;
        let frame_samples = self.frame_samples;

        let config = StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        running.store(true, Ordering::SeqCst);
        self.frames_captured.store(0, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut pending: Vec<f32> = Vec::with_capacity(frame_samples * 2);

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            return;
                        }

                        pending.extend_from_slice(data);

                        while pending.len() >= frame_samples {
                            let samples: Vec<f32> = pending.drain(..frame_samples).collect();
                            let frame = AudioFrame::new(samples, sample_rate);

                            frames_captured.fetch_add(1, Ordering::Relaxed);

                            // Drop on overflow; the callback must not block
                            let _ = output_buffer.push(frame);
                        }
                    },
                    move |err| {
                        tracing::error!("Capture stream error: {}", err);
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
                tracing::debug!(
                    sample_rate,
                    frame_samples,
                    "Capture started"
                );
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
                    "timed out waiting for capture stream".to_string(),
                ))
            }
        }
    }

    /// Stop capturing. Idempotent; releases the input device.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Capture stopped");
        }
    }

    /// Check if capture is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Total frames produced since start
    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureStage {
    fn drop(&mut self) {
        self.stop();
    }
}
