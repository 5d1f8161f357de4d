//! Recording session accumulation and lifecycle
//!
//! Owns the ordered segment sequence for one record -> stop cycle and
//! decides when a new segment becomes a transcribable unit. Because
//! only segment 0 carries the container header, every dispatched unit
//! is the concatenation of all segments from the start of the session.
//!
//! Lifecycle is an explicit phase machine (Idle is represented by the
//! session not existing yet):
//!
//! `Recording -> Finalizing -> Done`
//!
//! Finalization is guarded by the Recording -> Finalizing transition,
//! so repeated stop signals cannot produce a second final dispatch. A
//! failed final attempt stays in Finalizing and may be retried
//! explicitly; the merged text is never silently discarded.

mod api;
mod segment;

pub use api::{ApiError, HttpTranscribeApi, TranscribeApi, TranscribeResponse};
pub use segment::{wav_stream_header, AudioSegment, Segmenter};

use tracing::{info, warn};
use uuid::Uuid;

/// Capture cadence: one segment per five seconds of audio.
pub const SEGMENT_MILLIS: u64 = 5000;

/// How long to wait after stop for the device to flush its last,
/// possibly-undersized segment.
pub const STOP_GRACE_MILLIS: u64 = 400;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Recording,
    Finalizing,
    Done,
}

/// Accumulated state for one recording session.
pub struct RecordingSession {
    /// Identifies this session on the wire, so the server can tell a
    /// retried unit of the current session from the start of a new one.
    id: String,
    segments: Vec<AudioSegment>,
    /// Number of segments already covered by a dispatched unit.
    processed: usize,
    phase: SessionPhase,
}

/// A decodable unit ready for dispatch, with enough context to roll
/// the watermark back if dispatch fails.
pub struct PendingUnit {
    /// Index of the last segment this unit covers.
    pub seq: usize,
    pub unit: Vec<u8>,
    prev_processed: usize,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            segments: Vec::new(),
            processed: 0,
            phase: SessionPhase::Recording,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Record a newly arrived segment. Segments are ordered; the
    /// segmenter guarantees contiguous indices.
    pub fn push_segment(&mut self, segment: AudioSegment) {
        debug_assert_eq!(segment.index, self.segments.len());
        self.segments.push(segment);
    }

    /// Take the next unprocessed unit, optimistically advancing the
    /// watermark before dispatch. Returns `None` when everything seen
    /// so far has already been covered.
    pub fn take_pending_unit(&mut self) -> Option<PendingUnit> {
        if self.phase != SessionPhase::Recording || self.processed >= self.segments.len() {
            return None;
        }
        let prev_processed = self.processed;
        let last = self.segments.len() - 1;
        let unit = self.concat_unit(last);
        self.processed = self.segments.len();
        Some(PendingUnit {
            seq: last,
            unit,
            prev_processed,
        })
    }

    /// Un-mark a unit after a failed dispatch so the next trigger
    /// retries it. Duplicate dispatch for the same index is tolerated
    /// downstream; delivery is at-least-once.
    pub fn rollback(&mut self, pending: &PendingUnit) {
        self.processed = pending.prev_processed;
    }

    /// Attempt the Recording -> Finalizing transition. Only the first
    /// caller wins; later stop signals get `false`.
    pub fn try_begin_finalize(&mut self) -> bool {
        if self.phase == SessionPhase::Recording {
            self.phase = SessionPhase::Finalizing;
            true
        } else {
            false
        }
    }

    /// The final decodable unit: all segments collected this session.
    /// `None` when the session produced no audio.
    pub fn final_unit(&self) -> Option<Vec<u8>> {
        let last = self.segments.len().checked_sub(1)?;
        Some(self.concat_unit(last))
    }

    /// Mark finalization complete.
    pub fn complete(&mut self) {
        self.phase = SessionPhase::Done;
    }

    fn concat_unit(&self, last: usize) -> Vec<u8> {
        let mut unit = Vec::with_capacity(
            self.segments[..=last].iter().map(|s| s.bytes.len()).sum(),
        );
        for segment in &self.segments[..=last] {
            unit.extend_from_slice(&segment.bytes);
        }
        unit
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of finishing a recording session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    /// Stop arrived with zero segments collected; nothing was
    /// dispatched or persisted and the live text should be cleared.
    NoAudio,
    /// A final dispatch already succeeded for this session.
    AlreadyDone,
    /// The consolidated transcript. `transcript_id` is `None` when the
    /// text came back but the durable save failed server-side.
    Saved {
        text: String,
        transcript_id: Option<String>,
    },
}

/// Drives a recording session against a transcribe API: partial
/// dispatch per segment, exactly-once finalization, live-text
/// tracking.
pub struct SessionRunner<A: TranscribeApi> {
    api: A,
    session: RecordingSession,
    live_text: String,
}

impl<A: TranscribeApi> SessionRunner<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            session: RecordingSession::new(),
            live_text: String::new(),
        }
    }

    /// Best-known merged transcript for live display.
    pub fn live_text(&self) -> &str {
        &self.live_text
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    /// Handle a newly captured segment: accumulate it and dispatch the
    /// covering unit as a partial request.
    ///
    /// On dispatch failure the watermark is rolled back and the error
    /// returned; the session itself stays healthy and the unit will be
    /// retried on the next segment arrival.
    pub async fn on_segment(&mut self, segment: AudioSegment) -> Result<Option<String>, ApiError> {
        self.session.push_segment(segment);
        let Some(pending) = self.session.take_pending_unit() else {
            return Ok(None);
        };

        match self
            .api
            .transcribe(pending.unit.clone(), self.session.id(), pending.seq, false)
            .await
        {
            Ok(response) => {
                self.live_text = response.text.clone();
                Ok(Some(response.text))
            }
            Err(e) => {
                warn!("Partial dispatch for segment {} failed: {}", pending.seq, e);
                self.session.rollback(&pending);
                Err(e)
            }
        }
    }

    /// Finish the session with exactly one final dispatch.
    ///
    /// A failed attempt leaves the session in `Finalizing`; calling
    /// `finish` again retries it, keeping the unsaved text recoverable
    /// rather than silently discarded.
    pub async fn finish(&mut self) -> Result<FinishOutcome, ApiError> {
        match self.session.phase() {
            SessionPhase::Recording => {
                if !self.session.try_begin_finalize() {
                    return Ok(FinishOutcome::AlreadyDone);
                }
            }
            SessionPhase::Finalizing => {
                info!("Retrying final dispatch after earlier failure");
            }
            SessionPhase::Done => return Ok(FinishOutcome::AlreadyDone),
        }

        let Some(unit) = self.session.final_unit() else {
            self.session.complete();
            self.live_text.clear();
            info!("Recording stopped with no audio; nothing to save");
            return Ok(FinishOutcome::NoAudio);
        };

        let seq = self.session.segment_count() - 1;
        let response = self
            .api
            .transcribe(unit, self.session.id(), seq, true)
            .await?;
        self.session.complete();
        self.live_text = response.text.clone();
        Ok(FinishOutcome::Saved {
            text: response.text,
            transcript_id: response.transcript_id,
        })
    }
}
