use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {0}")]
    Status(u16),

    #[error("authentication failed (status {status})")]
    Auth { status: u16 },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    /// Target rejected by the path or outbound policy. Never carries the target.
    #[error("target rejected by safety policy")]
    Unsafe,

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("override store error: {0}")]
    Store(String),
}

impl DiscoveryError {
    /// True when the backend rejected the supplied credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, DiscoveryError::Auth { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No URLs provided")]
    NoUrls,

    #[error("Too many URLs (max {max})")]
    TooManyUrls { max: usize },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("URL is required")]
    MissingUrl,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] DiscoveryError),
}
