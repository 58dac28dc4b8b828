use std::fmt;

#[derive(Debug)]
pub enum HubError {
    Io(std::io::Error),
    Config(String),
    Protocol(String),
    /// A bounded pool or queue refused an allocation.
    Exhausted(&'static str),
    /// Authentication rejected. Deliberately carries no detail.
    Auth,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubError::Io(e) => write!(f, "i/o failure: {}", e),
            HubError::Config(msg) => write!(f, "bad configuration: {}", msg),
            HubError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            HubError::Exhausted(what) => write!(f, "resource exhausted: {}", what),
            HubError::Auth => write!(f, "authentication rejected"),
        }
    }
}

impl std::error::Error for HubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HubError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HubError {
    fn from(e: std::io::Error) -> Self {
        HubError::Io(e)
    }
}
