use thiserror::Error;

use gallery_fingerprint::FingerprintError;
use gallery_tree::TreeError;
use gallery_types::ImageId;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("image {image} duplicates existing image {existing}")]
    DuplicateImage { image: ImageId, existing: ImageId },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// Whether the failed call may succeed if repeated after a short wait.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Tree(e) if e.is_retryable())
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
