use thiserror::Error;

/// Centralized error type for the application edges (startup, CLI, bot wiring).
///
/// Pipeline stages have their own error enums in [`crate::download::error`];
/// those convert into this one when they bubble out of a command.
///
/// # Example
///
/// ```no_run
/// use fetchgram::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// External process errors
    #[error("Process error: {0}")]
    Process(#[from] crate::core::process::ProcessError),

    /// A request that went through the pipeline and failed
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::download::error::PipelineError),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Errors raised while reading configuration from the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("small threshold ({small} bytes) must be below large threshold ({large} bytes)")]
    ThresholdOrder { small: u64, large: u64 },

    #[error("{0} is required but not set")]
    Missing(&'static str),
}
