pub mod piper;

use std::time::Duration;

/// Why a synthesis attempt produced no audio.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("failed to start synthesizer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("synthesizer I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `code` is `None` when the process was terminated by a signal.
    #[error("synthesizer exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("synthesizer did not finish within {0:?}")]
    TimedOut(Duration),
}

/// A text-to-speech engine that produces raw 16-bit little-endian mono PCM.
///
/// Calls block until the audio is complete, so async callers should run them
/// on the blocking pool.
pub trait SpeechBackend: Send + Sync {
    /// Synthesizes `text` and returns the raw PCM bytes.
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;

    /// Returns the unique ID of the backend (e.g., "piper")
    fn id(&self) -> &'static str;
}
