use super::config::Config;
use crate::error::ClientError;
use secrecy::ExposeSecret;

/// Builds the websocket URL of the bidirectional generate-content endpoint.
/// The key travels as a query parameter, so the URL must never be logged.
pub(crate) fn build_url(config: &Config) -> Result<String, ClientError> {
    let key = config.api_key().expose_secret();
    if key.is_empty() {
        return Err(ClientError::InvalidConfig("api key is empty".to_string()));
    }
    Ok(format!(
        "{}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent?key={}",
        config.base_url(),
        config.api_version(),
        key
    ))
}
