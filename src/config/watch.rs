use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Watch stream tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Per-watcher event buffer; a watcher whose buffer fills is cancelled
    #[serde(default = "default_watcher_buffer_size")]
    pub watcher_buffer_size: usize,

    /// Mutations an in-process store retains for watches starting at an
    /// earlier revision
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Log every applied event at debug level
    #[serde(default)]
    pub trace_events: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watcher_buffer_size: default_watcher_buffer_size(),
            history_size: default_history_size(),
            trace_events: false,
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.watcher_buffer_size == 0 {
            return Err(Error::InvalidConfig("watcher_buffer_size must be greater than 0".into()));
        }
        Ok(())
    }
}

fn default_watcher_buffer_size() -> usize {
    128
}
fn default_history_size() -> usize {
    1024
}
