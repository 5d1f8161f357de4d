//! Audio segmenting
//!
//! Turns the capture PCM stream into fixed-cadence `AudioSegment`s.
//! Only segment 0 carries the WAV container header (with streaming
//! size fields), so a standalone later segment is not decodable: a
//! transcribable unit is always the concatenation of segments 0..=k.

use crate::capture::PcmChunk;

/// WAV header length in bytes.
const WAV_HEADER_LEN: usize = 44;

/// One opaque, ordered, immutable chunk of the recording.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub index: usize,
    pub bytes: Vec<u8>,
}

/// Build a streaming WAV header for 16-bit mono PCM.
///
/// The RIFF and data sizes are set to their maximum values, the usual
/// convention for streams whose length is unknown when the header is
/// written; decoders read to end-of-data instead.
pub fn wav_stream_header(sample_rate: u32) -> [u8; WAV_HEADER_LEN] {
    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&1u16.to_le_bytes()); // mono
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    header[32..34].copy_from_slice(&2u16.to_le_bytes()); // block align
    header[34..36].copy_from_slice(&16u16.to_le_bytes()); // bits per sample
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&u32::MAX.to_le_bytes());
    header
}

fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Slices the PCM stream into segments of a fixed duration.
pub struct Segmenter {
    sample_rate: u32,
    samples_per_segment: usize,
    buffer: Vec<i16>,
    next_index: usize,
}

impl Segmenter {
    /// `segment_millis` is the capture cadence (5000 ms in production).
    pub fn new(sample_rate: u32, segment_millis: u64) -> Self {
        let samples_per_segment = (sample_rate as u64 * segment_millis / 1000) as usize;
        Self {
            sample_rate,
            samples_per_segment: samples_per_segment.max(1),
            buffer: Vec::with_capacity(samples_per_segment.max(1)),
            next_index: 0,
        }
    }

    /// Feed captured PCM; returns a segment once a full cadence worth
    /// of audio has accumulated.
    pub fn push(&mut self, chunk: &PcmChunk) -> Option<AudioSegment> {
        self.buffer.extend_from_slice(&chunk.samples);
        if self.buffer.len() < self.samples_per_segment {
            return None;
        }
        let samples: Vec<i16> = self.buffer.drain(..self.samples_per_segment).collect();
        Some(self.emit(&samples))
    }

    /// Flush the trailing, possibly-undersized segment after capture
    /// has stopped. Returns `None` when no samples are buffered.
    pub fn flush(&mut self) -> Option<AudioSegment> {
        if self.buffer.is_empty() {
            return None;
        }
        let samples: Vec<i16> = self.buffer.drain(..).collect();
        Some(self.emit(&samples))
    }

    fn emit(&mut self, samples: &[i16]) -> AudioSegment {
        let index = self.next_index;
        self.next_index += 1;

        let mut bytes = if index == 0 {
            let mut b = Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2);
            b.extend_from_slice(&wav_stream_header(self.sample_rate));
            b
        } else {
            Vec::with_capacity(samples.len() * 2)
        };
        bytes.extend_from_slice(&pcm_bytes(samples));
        AudioSegment { index, bytes }
    }
}
