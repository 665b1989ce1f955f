pub const GEMINI_API_KEYS: &str = "GEMINI_API_KEYS";

pub const BASE_URL: &str = "wss://generativelanguage.googleapis.com";
pub const API_VERSION: &str = "v1alpha";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Seconds to wait for the websocket upgrade plus `setupComplete`.
pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 15;
