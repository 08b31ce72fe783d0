pub mod api_client;
pub mod backend;
#[cfg(test)]
pub(crate) mod fake;

pub use api_client::ApiClient;
pub use backend::BatchBackend;
