use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::engine::{HfImageGenerator, HfTextGenerator, ImageGenerator, TextGenerator};
use crate::prompt::load_docs;
use crate::registry::RequestRegistry;

/// Shared state handed to every route:
/// - registry: the only state requests share with each other
/// - text / images: upstream clients
/// - docs: toolkit notes injected into every prompt, read once
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: Arc<RequestRegistry>,
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub docs: String,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
    ) -> Arc<Self> {
        let docs = load_docs(config.docs_path.as_deref());
        Arc::new(Self {
            config,
            registry: Arc::new(RequestRegistry::new()),
            text,
            images,
            docs,
        })
    }

    /// Wires the Hugging Face clients described by `config`.
    pub fn from_config(config: GatewayConfig) -> Arc<Self> {
        let text = Arc::new(HfTextGenerator::new(
            config.inference_endpoint.clone(),
            config.api_token.clone(),
        ));
        let images = Arc::new(HfImageGenerator::new(
            config.image_api_url.clone(),
            config.api_token.clone(),
        ));
        Self::new(config, text, images)
    }
}
