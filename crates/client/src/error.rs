use rookery_api::ApiError;
use rookery_core::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to build api client: {0}")]
    Api(#[from] ApiError),
}
