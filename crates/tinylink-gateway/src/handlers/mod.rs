mod admin;
mod health;
mod redirect;
mod stats;
mod url;

pub use admin::replenish_handler;
pub use health::health_handler;
pub use redirect::redirect_handler;
pub use stats::queue_stats_handler;
pub use url::{list_urls_handler, shorten_handler};
