use std::sync::Arc;

use crate::api::ApiClient;
use crate::auth::AuthContext;
use crate::cache::{MemoryCache, QueryCache};
use crate::config::ClientConfig;
use crate::services::title_generation::{RemoteTitleGenerator, TitleGenerator};

/// Everything an operation needs, cheap to clone and shared across tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: ClientConfig,
    pub api: ApiClient,
    pub cache: Arc<dyn QueryCache>,
    pub auth: AuthContext,
    pub title_generator: Arc<dyn TitleGenerator>,
}

impl AppState {
    /// In-memory cache and the remote title generator. Signs in
    /// `config.user_id` when one is configured.
    pub fn new(config: ClientConfig) -> Self {
        let api = ApiClient::new(&config);
        let auth = AuthContext::new();
        if let Some(user_id) = &config.user_id {
            auth.sign_in(crate::models::users::UserView::new(user_id.clone()));
        }
        let title_generator = Arc::new(RemoteTitleGenerator::new(api.clone(), config.stream_timeout));

        AppState {
            config,
            api,
            cache: Arc::new(MemoryCache::new()),
            auth,
            title_generator,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_title_generator(mut self, title_generator: Arc<dyn TitleGenerator>) -> Self {
        self.title_generator = title_generator;
        self
    }
}
