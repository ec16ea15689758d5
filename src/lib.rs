// src/lib.rs

// Re-export modules
pub mod aggregate;
pub mod api;
pub mod config;
pub mod explorer;
pub mod mcp;
pub mod utils;

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: config::Config,
    /// Client for the 3xpl explorer API
    pub explorer: explorer::ExplorerClient,
}

impl AppState {
    pub fn new(config: config::Config) -> anyhow::Result<Self> {
        let explorer = explorer::ExplorerClient::new(&config)?;
        Ok(Self { config, explorer })
    }
}
