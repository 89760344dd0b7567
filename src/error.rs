use std::path::PathBuf;

/// Errors surfaced by the annotation core.
///
/// Nothing here is retried; every variant is reported to the caller of the
/// operation that produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Navigation past the session bounds, an index that does not exist, or
    /// an operation on a session with no images.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The suggestion step failed for one image. The image can still be
    /// annotated by hand.
    #[error("suggestion model failed for {}: {message}", path.display())]
    OracleInvocation { path: PathBuf, message: String },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to process image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid box: {0}")]
    InvalidBox(String),

    #[error("class error: {0}")]
    Class(String),

    /// Export was requested before every image had been processed.
    #[error("session is not complete: {remaining} image(s) still to be processed")]
    SessionIncomplete { remaining: usize },

    #[error("settings error: {0}")]
    Settings(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Error::Image {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
