//! namesake: chapter-by-chapter novel translation that keeps proper names
//! consistent through a per-novel dictionary.
//! Library root: module tree, tracing setup, and the shared service wiring.

pub mod config;
pub mod metrics;
pub mod model;
pub mod review;
pub mod state_machine;
pub mod store;
pub mod translate;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::Config;
use metrics::MetricsRegistry;
use review::NameReview;
use store::{Store, StoreError};
use translate::llm::ChatClient;
use translate::orchestrator::TranslationOrchestrator;
use translate::{LanguageModel, UnavailableModel};

/// Initialize tracing to stderr. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("namesake=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Services shared by every command of one process.
pub struct AppContext {
    pub store: Arc<Store>,
    pub metrics: Arc<MetricsRegistry>,
    pub orchestrator: TranslationOrchestrator,
    pub review: NameReview,
    /// False when no API key is configured; model-backed commands will fail.
    pub model_available: bool,
}

impl AppContext {
    pub fn new(config: &Config, cancel: CancellationToken) -> Result<Self, StoreError> {
        let store = Arc::new(Store::open(&config.db_path)?);
        let (model, model_available): (Arc<dyn LanguageModel>, bool) =
            match ChatClient::new(&config.llm, cancel) {
                Ok(client) => (Arc::new(client), true),
                Err(e) => {
                    warn!(error = %e, "language model unavailable");
                    (Arc::new(UnavailableModel::new(e.to_string())), false)
                }
            };
        Ok(Self::with_model(store, model, config, model_available))
    }

    /// Wire the services around an existing store and model.
    pub fn with_model(
        store: Arc<Store>,
        model: Arc<dyn LanguageModel>,
        config: &Config,
        model_available: bool,
    ) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());
        let orchestrator = TranslationOrchestrator::new(
            Arc::clone(&store),
            model,
            config.pipeline.clone(),
            config.llm.call_timeout,
            Arc::clone(&metrics),
        );
        let review = NameReview::new(Arc::clone(&store));
        info!(db = %config.db_path.display(), model_available, "namesake ready");
        Self {
            store,
            metrics,
            orchestrator,
            review,
            model_available,
        }
    }
}
