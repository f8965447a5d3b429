mod admin;
mod health;
mod url;

pub use admin::ReplenishResponse;
pub use health::HealthResponse;
pub use url::{
    ErrorResponse, ListUrlsQuery, ListUrlsResponse, ShortenRequest, ShortenResponse, UrlEntry,
};
