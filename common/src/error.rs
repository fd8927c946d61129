#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StudyError {
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("not allowed: {0}")]
    NotAllowed(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
}
