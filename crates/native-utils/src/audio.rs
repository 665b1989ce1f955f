use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Averages interleaved channels down to mono.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
        .collect()
}

/// Converts normalized f32 samples to i16, clamping out-of-range values.
pub fn f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts i16 samples to f32 in `[-1.0, 1.0)`.
pub fn i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Little-endian byte encoding of i16 samples, the wire layout of raw PCM16.
pub fn i16_to_le_bytes(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Interprets little-endian bytes as i16 samples. A trailing odd byte is dropped.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Encodes i16 samples as base64 PCM16.
pub fn encode_i16(pcm16: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(i16_to_le_bytes(pcm16))
}

/// Decodes base64 PCM16 into i16 samples.
pub fn decode_i16(base64_fragment: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    Ok(le_bytes_to_i16(&bytes))
}

/// Cuts a continuous sample stream into fixed-size chunks.
///
/// Samples are carried over between calls, so chunk boundaries do not depend
/// on how the device callback happens to slice its buffers.
#[derive(Debug)]
pub struct Chunker {
    chunk_size: usize,
    pending: Vec<f32>,
}

impl Chunker {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pending: Vec::with_capacity(chunk_size * 2),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Appends samples and returns every chunk that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.chunk_size;
        let mut chunks = Vec::with_capacity(complete);
        for _ in 0..complete {
            chunks.push(self.pending.drain(..self.chunk_size).collect());
        }
        chunks
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
