pub mod error;
pub mod handlers;
pub mod routes;
pub mod upload;

pub use error::ApiError;
