//! HTTP API for BingoBongo.
//!
//! ## Endpoints
//!
//! - `GET /` - Landing page
//! - `GET /tasks` - Task catalog as JSON (`[{task, type}]`)
//! - `GET /event?token=T` - Task list for the token's group
//! - `POST /upload` - Submit a file (multipart) or a text answer (url-encoded)
//! - `GET /static/*` - Static assets

mod error;
mod pages;
mod routes;
pub mod types;
mod upload;

pub use error::ApiError;
pub use routes::{router, serve, AppState};
