//! Native audio helpers: PCM16 conversion, base64 framing, resampling and
//! cpal device discovery.

pub mod audio;
pub mod device;
