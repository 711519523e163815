use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{field} is {len} characters, maximum is {max}")]
    IdentifierTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}
