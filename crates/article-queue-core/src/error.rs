use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported job schema version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },
}

pub type Result<T> = std::result::Result<T, JobError>;
