use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error loading config: `{0}`")]
    Io(#[from] std::io::Error),

    #[error("error parsing config: `{0}`")]
    Json(#[from] serde_json::Error),
}
