/// Result alias that carries the custom [`VisualsError`] type.
pub type Result<T> = std::result::Result<T, VisualsError>;

/// Common error type for the core crate.
///
/// Most of these never cross a render tick: the engine and director log them
/// and treat the failing contribution as a no-op.
#[derive(Debug, thiserror::Error)]
pub enum VisualsError {
    /// Free-form failure reported by a collaborator.
    #[error("{0}")]
    Message(String),
    /// Input rejected before any work was done.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A scene name that is not part of the program table.
    #[error("unknown scene `{0}`")]
    UnknownScene(String),
    /// The graphics backend refused an allocation or load.
    #[error("graphics backend: {0}")]
    Backend(String),
    /// An asynchronous operation was dropped before it produced a value.
    #[error("operation canceled: {0}")]
    Canceled(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("fft: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl VisualsError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn backend<T: Into<String>>(msg: T) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<&str> for VisualsError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualsError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
