//! WAV framing for raw Piper output.
//!
//! Piper in raw mode writes headerless 16-bit little-endian mono PCM. Browsers
//! need a RIFF container around it, so [`frame`] prepends a canonical 44-byte
//! header and copies the samples through untouched.

use hound::{SampleFormat, WavSpec};

/// Size of the RIFF/WAVE header written by [`frame`].
pub const WAV_HEADER_LEN: usize = 44;

/// Length of the `fmt ` chunk body for plain PCM.
const FMT_CHUNK_LEN: u32 = 16;

/// `WAVE_FORMAT_PCM`
const FORMAT_PCM: u16 = 1;

/// The only format Piper's raw output comes in.
pub fn pcm16_mono(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Wrap raw PCM bytes in a WAV container.
///
/// Never fails: any length is accepted, including zero and odd lengths, and
/// the bytes land in the `data` chunk exactly as given. Sizes that do not fit
/// in 32 bits saturate at `u32::MAX`.
pub fn frame(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let spec = pcm16_mono(sample_rate);
    let block_align = spec.channels * (spec.bits_per_sample / 8);
    let byte_rate = spec.sample_rate.saturating_mul(u32::from(block_align));

    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);
    let riff_len = data_len.saturating_add(36);

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_len.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&spec.channels.to_le_bytes());
    out.extend_from_slice(&spec.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&spec.bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}
