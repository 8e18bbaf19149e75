//! Blocking bridge for the HTTP backends.
//!
//! The engine is synchronous; the remote store and the REST cache drive `reqwest` on a small
//! private tokio runtime. Calling into these backends from inside another tokio runtime
//! panics, so async callers should use `spawn_blocking`.

use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_WORKER_THREADS: usize = 2;

pub(crate) struct HttpBridge {
    runtime: Runtime,
    client: Client,
}

impl HttpBridge {
    pub(crate) fn new(request_timeout: Duration) -> Result<Self, String> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(HTTP_WORKER_THREADS)
            .thread_name("heritage-http")
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to create HTTP runtime: {}", e))?;
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(HTTP_CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
        Ok(Self { runtime, client })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
