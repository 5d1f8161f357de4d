//! Sample processing: mono downmix, resampling, chunked delivery

use super::types::PcmChunk;
use super::SAMPLE_RATE;
use rubato::{Resampler, SincFixedIn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Chunk size in samples (0.1 seconds of audio at 16kHz).
pub(crate) const CHUNK_SIZE: usize = 1600;

/// Process incoming samples from the device callback: downmix to mono,
/// resample if the device rate differs from the target, and send
/// complete chunks down the PCM channel.
pub(crate) fn process_samples(
    data: &[i16],
    channels: usize,
    input_buffer: &Arc<Mutex<Vec<i16>>>,
    input_chunk_size: usize,
    output_buffer: &Arc<Mutex<Vec<i16>>>,
    sender: &mpsc::Sender<PcmChunk>,
    resampler: &Option<Arc<Mutex<SincFixedIn<f32>>>>,
) {
    // Downmix to mono by averaging channels
    let mono: Vec<i16> = if channels > 1 {
        data.chunks(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    } else {
        data.to_vec()
    };

    if let Some(resampler_arc) = resampler {
        resample_and_buffer(
            &mono,
            input_buffer,
            input_chunk_size,
            output_buffer,
            resampler_arc,
        );
    } else if let Ok(mut output) = output_buffer.lock() {
        output.extend(&mono);
    }

    send_chunks(output_buffer, sender);
}

/// Run buffered input through the resampler into the output buffer.
fn resample_and_buffer(
    mono: &[i16],
    input_buffer: &Arc<Mutex<Vec<i16>>>,
    input_chunk_size: usize,
    output_buffer: &Arc<Mutex<Vec<i16>>>,
    resampler_arc: &Arc<Mutex<SincFixedIn<f32>>>,
) {
    let Ok(mut input) = input_buffer.lock() else {
        return;
    };
    input.extend(mono);

    while input.len() >= input_chunk_size {
        let chunk: Vec<i16> = input.drain(..input_chunk_size).collect();
        let chunk_f32: Vec<f32> = chunk.iter().map(|&s| s as f32 / 32768.0).collect();

        let Ok(mut resampler) = resampler_arc.lock() else {
            return;
        };
        match resampler.process(&[chunk_f32], None) {
            Ok(resampled) => {
                let out_i16: Vec<i16> = resampled[0]
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .collect();
                if let Ok(mut output) = output_buffer.lock() {
                    output.extend(&out_i16);
                }
            }
            Err(e) => {
                error!("Resampling error: {}", e);
            }
        }
    }
}

/// Send complete chunks from the output buffer.
fn send_chunks(output_buffer: &Arc<Mutex<Vec<i16>>>, sender: &mpsc::Sender<PcmChunk>) {
    let Ok(mut output) = output_buffer.lock() else {
        return;
    };
    while output.len() >= CHUNK_SIZE {
        let samples: Vec<i16> = output.drain(..CHUNK_SIZE).collect();
        let chunk = PcmChunk {
            samples,
            sample_rate: SAMPLE_RATE,
        };
        // try_send so the realtime audio callback never blocks
        if let Err(e) = sender.try_send(chunk) {
            warn!("PCM buffer overflow - chunk dropped: {}", e);
            return;
        }
    }
}
