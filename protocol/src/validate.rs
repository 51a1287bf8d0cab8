use thiserror::Error;

/// Input rejected before any network activity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("nickname must not be empty")]
    EmptyNickname,

    #[error("invalid port '{0}'")]
    InvalidPort(String),

    #[error("unknown framing '{0}', expected 'raw' or 'length-prefixed'")]
    UnknownFraming(String),
}

pub fn parse_port(text: &str) -> Result<u16, ValidationError> {
    text.trim()
        .parse::<u16>()
        .map_err(|_| ValidationError::InvalidPort(text.to_owned()))
}

pub fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.trim().is_empty() {
        return Err(ValidationError::EmptyHost);
    }
    Ok(())
}

// duplicates are allowed, only emptiness is checked
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.is_empty() {
        return Err(ValidationError::EmptyNickname);
    }
    Ok(())
}
