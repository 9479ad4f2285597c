use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Browser launch error: {0}")]
    Launch(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("API validation failed:\n{0}")]
    ApiValidation(String),

    #[error("Domain fixture error: {0}")]
    DomainFile(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Prompt error: {0}")]
    Prompt(String),
}

pub type Result<T> = std::result::Result<T, E2eError>;
