use thiserror::Error;

/// Protocol-core error taxonomy. Only `Frame`, `Cipher`, `TooLarge` and `Io`
/// terminate a channel; everything else is logged and the offending command
/// dropped.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("outbound command too large ({0:#x} bytes)")]
    TooLarge(usize),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("login refused: {0}")]
    Auth(String),

    #[error("session state: {0}")]
    SessionState(String),

    #[error("resource limit: {0}")]
    Resource(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("i/o failure: {0}")]
    Io(String),
}

impl NetError {
    /// Whether this error must close the channel it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetError::Frame(_) | NetError::TooLarge(_) | NetError::Cipher(_) | NetError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_level_errors_are_fatal() {
        assert!(NetError::Frame("x".into()).is_fatal());
        assert!(NetError::Cipher("x".into()).is_fatal());
        assert!(NetError::Io("x".into()).is_fatal());
        assert!(NetError::TooLarge(0x8000).is_fatal());
        assert!(!NetError::Protocol("x".into()).is_fatal());
        assert!(!NetError::SessionState("x".into()).is_fatal());
        assert!(!NetError::Resource("x".into()).is_fatal());
        assert!(!NetError::Auth("x".into()).is_fatal());
        assert!(!NetError::Internal("x".into()).is_fatal());
    }
}
