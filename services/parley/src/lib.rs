pub mod audio_devices;
pub mod config;
pub mod gemini_adapter;
