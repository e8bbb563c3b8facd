//! Application state for the inference server
//!
//! Holds the loaded predictor and the limits the router is built with.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use coffee_defect::backend::InferenceBackend;
use coffee_defect::Predictor;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Checkpoint loaded at startup
    pub model_path: PathBuf,
    /// Requests processed at once; the rest wait
    pub max_concurrency: usize,
    /// Requests slower than this get a 408
    pub request_timeout: Duration,
    /// Larger bodies get a 413
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            model_path: PathBuf::from("models/best_model.mpk"),
            max_concurrency: 4,
            request_timeout: Duration::from_secs(30),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Shared application state
pub struct AppState {
    /// Burn modules are `Send` but not `Sync`; the lock makes the state shareable.
    pub predictor: Mutex<Predictor<InferenceBackend>>,
    /// One permit per running forward pass, held until the blocking job ends
    pub inference_permits: Arc<Semaphore>,
    pub config: ServerConfig,
    /// Server start time
    pub started_at: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(predictor: Predictor<InferenceBackend>, config: ServerConfig) -> Self {
        Self {
            predictor: Mutex::new(predictor),
            inference_permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
            started_at: Instant::now(),
        }
    }

    /// A private handle for one request. Module clones share parameters, so
    /// this is cheap and the forward pass never touches the shared copy.
    pub fn predictor(&self) -> Predictor<InferenceBackend> {
        self.predictor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
