use std::path::PathBuf;
use std::time::Duration;

const API_URL_DEFAULT: &str = "http://127.0.0.1:5252";
const TIMEOUT_SECS_DEFAULT: u64 = 30;
const DATA_DIR_DEFAULT: &str = "studies";
const HOST_DEFAULT: &str = "127.0.0.1";
const PORT_DEFAULT: u16 = 5252;

/// Where the study service lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("AREAMAP_API_URL")
                .unwrap_or_else(|_| API_URL_DEFAULT.to_string()),
            token: std::env::var("AREAMAP_API_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            timeout: Duration::from_secs(
                std::env::var("AREAMAP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| TIMEOUT_SECS_DEFAULT.to_string())
                    .parse()
                    .unwrap_or(TIMEOUT_SECS_DEFAULT),
            ),
        }
    }
}

impl ApiConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(
                std::env::var("AREAMAP_DATA_DIR").unwrap_or_else(|_| DATA_DIR_DEFAULT.to_string()),
            ),
            host: HOST_DEFAULT.to_string(),
            port: PORT_DEFAULT,
        }
    }
}

impl ServeConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
