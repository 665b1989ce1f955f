use super::consts;
use secrecy::SecretString;
use std::time::Duration;

pub struct Config {
    base_url: String,
    api_version: String,
    api_key: SecretString,
    model: String,
    setup_timeout: Duration,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_version(mut self, api_version: &str) -> Self {
        self.config.api_version = api_version.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.config.api_key = api_key;
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.config.setup_timeout = timeout;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Defaults with an empty API key; a key must be supplied per connection.
    pub fn new() -> Self {
        Self {
            base_url: consts::BASE_URL.to_string(),
            api_version: consts::API_VERSION.to_string(),
            api_key: SecretString::from(String::new()),
            model: consts::DEFAULT_MODEL.to_string(),
            setup_timeout: Duration::from_secs(consts::DEFAULT_SETUP_TIMEOUT_SECS),
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn setup_timeout(&self) -> Duration {
        self.setup_timeout
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
