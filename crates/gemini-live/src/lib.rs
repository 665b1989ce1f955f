mod client;
mod error;

pub use client::config::{Config, ConfigBuilder};
pub use client::consts;
pub use client::{Client, connect};
pub use error::{ClientError, FailureClass};
pub use gemini_live_types as types;
