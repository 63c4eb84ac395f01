use std::sync::Arc;
use std::time::Duration;

use bindwatch::Client;
use bindwatch::MemoryStore;
use bindwatch::Settings;
use tokio::time::sleep;
use tokio::time::timeout;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn connect(
    store: &MemoryStore,
    url: &str,
) -> Client {
    let settings = Settings::default().with_store_url(url).expect("valid store url");
    Client::builder(settings)
        .build(Arc::new(store.clone()))
        .await
        .expect("client connects to memory store")
}

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] elapses
pub async fn wait_until(
    what: &str,
    condition: impl Fn() -> bool,
) {
    let reached = timeout(WAIT_TIMEOUT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}
