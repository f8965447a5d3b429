use std::sync::Arc;

use tinylink_core::Shortener;
use tinylink_redirector::Redirector;

#[derive(Clone)]
pub struct AppState {
    pub(crate) shortener: Arc<dyn Shortener>,
    pub(crate) redirector: Arc<dyn Redirector>,
    pub(crate) base_url: String,
}

impl AppState {
    pub fn new(
        shortener: Arc<dyn Shortener>,
        redirector: Arc<dyn Redirector>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            shortener,
            redirector,
            base_url: public_base_url.into(),
        }
    }
}
