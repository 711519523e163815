use crate::error::{ProtocolError, Result};

/// Longest `uaid` or `channelID` a server is required to accept.
pub const MAX_IDENTIFIER_LEN: usize = 100;

#[must_use]
pub fn is_valid_identifier(id: &str) -> bool {
    id.chars().count() <= MAX_IDENTIFIER_LEN
}

pub fn validate_identifier(field: &'static str, id: &str) -> Result<()> {
    let len = id.chars().count();
    if len > MAX_IDENTIFIER_LEN {
        return Err(ProtocolError::IdentifierTooLong {
            field,
            len,
            max: MAX_IDENTIFIER_LEN,
        });
    }
    Ok(())
}
