pub mod commands;
pub mod config;
pub mod doc_processor;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{load_config, AppConfig};
pub use server::ServeError;

/// Build the service from `config` and serve until shutdown.
pub async fn run(config: AppConfig) -> Result<(), ServeError> {
    tracing::info!(
        version = config::APP_VERSION,
        bind = %config.server.bind,
        storage = ?config.storage.backend,
        "starting {}",
        config::APP_NAME
    );
    server::serve(config).await
}
