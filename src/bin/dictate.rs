//! voxnote dictation client.
//!
//! Records from the default microphone, slices the stream into
//! five-second segments, and dispatches growing decodable units to a
//! voxnote server for incremental transcription. Press Enter to stop;
//! the final transcript is printed and saved server-side.

use anyhow::Context;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voxnote::capture::{start_capture, PcmChunk, SAMPLE_RATE};
use voxnote::session::{
    FinishOutcome, HttpTranscribeApi, Segmenter, SessionRunner, SEGMENT_MILLIS, STOP_GRACE_MILLIS,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let base_url =
        std::env::var("VOXNOTE_SERVER").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
    let token = std::env::var("VOXNOTE_TOKEN").context("VOXNOTE_TOKEN is not set")?;

    let api = HttpTranscribeApi::new(&base_url, &token)?;
    let mut runner = SessionRunner::new(api);
    let mut segmenter = Segmenter::new(SAMPLE_RATE, SEGMENT_MILLIS);

    let (mut handle, mut chunk_rx) = start_capture().context("Failed to start recording")?;
    println!("Recording... press Enter to stop.");

    // Watch stdin on a plain thread; reading a line cannot be cancelled
    // but we only care about the first one.
    let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = stop_tx.send(());
    });

    loop {
        tokio::select! {
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => feed(&mut runner, &mut segmenter, &chunk).await,
                // Device released unexpectedly; finalize what we have.
                None => break,
            },
            _ = &mut stop_rx => {
                handle.stop();
                break;
            }
        }
    }

    // Grace period: the device flushes its last samples after stop, so
    // drain the channel briefly before cutting the trailing segment.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(STOP_GRACE_MILLIS);
    loop {
        match tokio::time::timeout_at(deadline, chunk_rx.recv()).await {
            Ok(Some(chunk)) => feed(&mut runner, &mut segmenter, &chunk).await,
            Ok(None) | Err(_) => break,
        }
    }
    if let Some(trailing) = segmenter.flush() {
        if let Err(e) = runner.on_segment(trailing).await {
            eprintln!("warning: last partial failed ({e}); it is covered by the final unit");
        }
    }

    println!("\nFinalizing...");
    match runner.finish().await {
        Ok(FinishOutcome::Saved {
            text,
            transcript_id,
        }) => {
            println!("\n{text}\n");
            match transcript_id {
                Some(id) => println!("Saved as transcript {id}"),
                None => eprintln!("warning: transcribed but not saved server-side"),
            }
        }
        Ok(FinishOutcome::NoAudio) => println!("No audio captured; nothing to save."),
        Ok(FinishOutcome::AlreadyDone) => {}
        Err(e) => {
            eprintln!("error: final transcription failed: {e}");
            if !runner.live_text().is_empty() {
                eprintln!("last partial transcript:\n{}", runner.live_text());
            }
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Feed one PCM chunk through the segmenter, dispatching a partial
/// request whenever a full segment comes out. Dispatch failures are
/// reported but never abort the recording; the failed unit is retried
/// when the next segment arrives.
async fn feed<A: voxnote::session::TranscribeApi>(
    runner: &mut SessionRunner<A>,
    segmenter: &mut Segmenter,
    chunk: &PcmChunk,
) {
    let Some(segment) = segmenter.push(chunk) else {
        return;
    };
    match runner.on_segment(segment).await {
        Ok(Some(text)) => {
            println!("--- {text}");
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("warning: partial transcription failed ({e}); will retry");
        }
    }
}
