/// Errors raised by inputs and their source adapters.
///
/// None of these are fatal to the agent: a failing gather degrades to fewer
/// samples for that tick and the error only reaches the logs.
///
/// # Examples
///
/// ```rust
/// use tally_collector::error::CollectorError;
///
/// let err = CollectorError::MalformedIdentifier("badid".to_string());
/// assert!(err.to_string().contains("owner/repository"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// Instance configuration is missing a required field or has an invalid value.
    #[error("invalid input configuration: {0}")]
    InvalidConfig(String),

    /// The configuration names an input plugin that is not registered.
    #[error("unknown input plugin '{0}'")]
    UnknownPlugin(String),

    /// An entity identifier did not split into exactly two parts.
    #[error("{0} is not of format 'owner/repository'")]
    MalformedIdentifier(String),

    /// An underlying HTTP transport error from `reqwest`.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote API answered with a non-2xx status.
    #[error("API error: status={status}, body={body}")]
    Api { status: u16, body: String },

    /// JSON serialization or deserialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line of the text exposition format could not be parsed.
    #[error("exposition parse error at line {line}: {message}")]
    Exposition { line: usize, message: String },

    /// `gather` was called before `init` or after `shutdown`.
    #[error("input instance is not initialized")]
    NotInitialized,
}

/// Convenience type alias so callers can write `error::Result<T>`.
pub type Result<T> = std::result::Result<T, CollectorError>;
