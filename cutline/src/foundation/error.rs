pub type CutlineResult<T> = Result<T, CutlineError>;

#[derive(thiserror::Error, Debug)]
pub enum CutlineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CutlineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Return `true` when this error is the cooperative-cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            CutlineError::validation("x")
                .to_string()
                .contains("validation error:")
        );
        assert!(CutlineError::decode("x").to_string().contains("decode error:"));
        assert!(CutlineError::encode("x").to_string().contains("encode error:"));
        assert!(CutlineError::parse("x").to_string().contains("parse error:"));
        assert!(CutlineError::write("x").to_string().contains("write error:"));
    }

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(CutlineError::Cancelled.is_cancelled());
        assert!(!CutlineError::validation("x").is_cancelled());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = CutlineError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
