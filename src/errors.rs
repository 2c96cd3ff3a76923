pub type ToolkitResult<T> = Result<T, ToolkitError>;

#[derive(thiserror::Error, Debug)]
pub enum ToolkitError {
    #[error("Failed to parse region metadata: {0}")]
    RegionMetadataError(String),
    #[error("Failed to load regions: {0}")]
    RegionLoadError(String),
    #[error("Network request failed: {0}")]
    NetworkError(String),
    #[error("Failed to the credentials file process: {0}")]
    CredentialsFileError(String),
    #[error("Failed to the preference store process: {0}")]
    PreferenceStoreError(String),
    #[error("Failed to build client: {0}")]
    ClientBuildError(String),
    #[error("Get invalid argument error: {0}")]
    InvalidArgumentError(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Operation was canceled")]
    Canceled,
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
