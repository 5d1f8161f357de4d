//! Microphone capture using cpal
//!
//! Captures audio from the default input device on a dedicated thread,
//! downmixed to mono and resampled to 16 kHz PCM, the rate the
//! segmenter encodes for the speech service.

mod resampler;
mod types;

pub use types::{CaptureError, CaptureHandle, PcmChunk};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use resampler::{process_samples, CHUNK_SIZE};
use rubato::{SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Target PCM sample rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Start microphone capture on a dedicated thread.
///
/// # Returns
/// - `CaptureHandle` - stops capture and releases the device
/// - `mpsc::Receiver<PcmChunk>` - mono 16 kHz PCM; the channel closes
///   when the device has flushed its last samples, so consumers have a
///   definite "no more segments will arrive" event
///
/// # Errors
/// `CaptureError` if no input device is available, no configuration is
/// supported, or the stream cannot be started.
pub fn start_capture() -> Result<(CaptureHandle, mpsc::Receiver<PcmChunk>), CaptureError> {
    // Probe for a device up front so the caller gets a synchronous
    // failure instead of a silently empty channel.
    cpal::default_host()
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;

    let is_capturing = Arc::new(AtomicBool::new(true));
    let is_capturing_thread = is_capturing.clone();

    let (chunk_tx, chunk_rx) = mpsc::channel(600);

    let thread_handle = thread::spawn(move || {
        if let Err(e) = run_capture(is_capturing_thread, chunk_tx) {
            error!("Microphone capture error: {}", e);
        }
    });

    let handle = CaptureHandle {
        is_capturing,
        thread_handle: Some(thread_handle),
    };

    Ok((handle, chunk_rx))
}

/// Run capture on the current thread (blocking until stopped).
fn run_capture(
    is_capturing: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<PcmChunk>,
) -> Result<(), CaptureError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(CaptureError::NoInputDevice)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using audio input device: {}", device_name);

    // Prefer a config that supports the target rate natively; otherwise
    // take what the device offers and resample.
    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?;

    let mut best_config = None;
    let mut found_target_rate = false;
    for config in supported_configs {
        if config.channels() == 0 {
            continue;
        }
        if config.min_sample_rate().0 <= SAMPLE_RATE && config.max_sample_rate().0 >= SAMPLE_RATE {
            best_config = Some(config.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)));
            found_target_rate = true;
            break;
        } else if best_config.is_none() {
            best_config = Some(config.with_max_sample_rate());
        }
    }
    let supported_config = best_config.ok_or(CaptureError::NoSupportedConfig)?;

    if !found_target_rate {
        warn!(
            "{}Hz not supported, capturing at {}Hz and resampling",
            SAMPLE_RATE,
            supported_config.sample_rate().0
        );
    }

    let config: cpal::StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    info!("Audio config: {} channels, {} Hz", channels, sample_rate);

    let (resampler, input_chunk_size): (Option<Arc<Mutex<SincFixedIn<f32>>>>, usize) =
        if sample_rate != SAMPLE_RATE {
            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let input_frames =
                (CHUNK_SIZE as f64 * sample_rate as f64 / SAMPLE_RATE as f64).ceil() as usize;
            match SincFixedIn::<f32>::new(
                SAMPLE_RATE as f64 / sample_rate as f64,
                2.0,
                params,
                input_frames,
                1, // mono
            ) {
                Ok(resampler) => {
                    info!(
                        "Resampler configured: {} Hz -> {} Hz",
                        sample_rate, SAMPLE_RATE
                    );
                    (Some(Arc::new(Mutex::new(resampler))), input_frames)
                }
                Err(e) => {
                    error!("Failed to create resampler: {}", e);
                    (None, CHUNK_SIZE)
                }
            }
        } else {
            (None, CHUNK_SIZE)
        };

    let input_buffer: Arc<Mutex<Vec<i16>>> =
        Arc::new(Mutex::new(Vec::with_capacity(input_chunk_size * 2)));
    let output_buffer: Arc<Mutex<Vec<i16>>> =
        Arc::new(Mutex::new(Vec::with_capacity(CHUNK_SIZE * 2)));

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let stream = match device.default_input_config()?.sample_format() {
        SampleFormat::I16 => {
            let is_capturing_cb = is_capturing.clone();
            let input_buffer_cb = input_buffer.clone();
            let output_buffer_cb = output_buffer.clone();
            let chunk_tx_cb = chunk_tx.clone();
            let resampler_cb = resampler.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !is_capturing_cb.load(Ordering::SeqCst) {
                        return;
                    }
                    process_samples(
                        data,
                        channels,
                        &input_buffer_cb,
                        input_chunk_size,
                        &output_buffer_cb,
                        &chunk_tx_cb,
                        &resampler_cb,
                    );
                },
                err_callback,
                None,
            )?
        }
        SampleFormat::F32 => {
            let is_capturing_cb = is_capturing.clone();
            let input_buffer_cb = input_buffer.clone();
            let output_buffer_cb = output_buffer.clone();
            let chunk_tx_cb = chunk_tx.clone();
            let resampler_cb = resampler.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !is_capturing_cb.load(Ordering::SeqCst) {
                        return;
                    }
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    process_samples(
                        &samples,
                        channels,
                        &input_buffer_cb,
                        input_chunk_size,
                        &output_buffer_cb,
                        &chunk_tx_cb,
                        &resampler_cb,
                    );
                },
                err_callback,
                None,
            )?
        }
        sample_format => {
            return Err(CaptureError::UnsupportedFormat(format!("{:?}", sample_format)));
        }
    };

    stream.play()?;
    info!("Microphone capture started");

    while is_capturing.load(Ordering::SeqCst) {
        thread::sleep(std::time::Duration::from_millis(100));
    }

    // Dropping the stream releases the device; returning drops chunk_tx
    // which closes the PCM channel.
    drop(stream);
    Ok(())
}
