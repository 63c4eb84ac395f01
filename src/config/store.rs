use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::key::KEY_SEPARATOR;
use crate::Error;
use crate::Result;

/// Port assumed when a store URL carries none
pub const DEFAULT_STORE_PORT: u16 = 2379;

/// Connection parameters of the remote key-value store
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Ordered endpoint addresses, tried first to last
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Root prefix relative keys are resolved against
    #[serde(default = "default_root")]
    pub root: String,

    /// Connection and snapshot read timeout (unit: seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            root: default_root(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl StoreConfig {
    /// Bounded timeout for connecting and for each snapshot read
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Parses a store location such as `etcd://127.0.0.1:2379/com/test/demo/`.
    ///
    /// The authority becomes the single endpoint and the path becomes the
    /// root. `etcds://` maps to an `https` endpoint, any other scheme to `http`.
    pub fn from_url(raw: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidUrl {
            url: raw.to_string(),
            message: message.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;
        let port = url.port().unwrap_or(DEFAULT_STORE_PORT);
        let transport = if url.scheme() == "etcds" { "https" } else { "http" };

        let root = match url.path() {
            "" => KEY_SEPARATOR.to_string(),
            path => path.to_string(),
        };

        Ok(Self {
            endpoints: vec![format!("{transport}://{host}:{port}")],
            root,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::InvalidConfig("at least one store endpoint required".into()));
        }
        if self.endpoints.iter().any(|e| e.trim().is_empty()) {
            return Err(Error::InvalidConfig("store endpoint cannot be empty".into()));
        }
        if self.root.is_empty() {
            return Err(Error::InvalidConfig("store root cannot be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::InvalidConfig("timeout_seconds must be greater than 0".into()));
        }
        Ok(())
    }
}

fn default_endpoints() -> Vec<String> {
    vec![format!("http://127.0.0.1:{DEFAULT_STORE_PORT}")]
}
fn default_root() -> String {
    KEY_SEPARATOR.to_string()
}
fn default_timeout_seconds() -> u64 {
    5
}
