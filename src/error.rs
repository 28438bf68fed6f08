use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeedTestError {
    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("proxy {0} is the duplicate name")]
    DuplicateProxy(String),

    #[error("{0}")]
    Proxy(String),
}

pub type Result<T> = std::result::Result<T, SpeedTestError>;
