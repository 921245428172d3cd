use thiserror::Error;

/// Errors raised on the controller-facing side of the proxy.
///
/// CSA-side failures are handled inside the CII/TS server endpoints and never
/// surface here. Malformed controller traffic is recoverable (logged and
/// dropped, the connection stays open); a contract violation from a
/// collaborator is fatal because continuing risks serving wrong timing.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed controller message: {0}")]
    MalformedControllerMessage(#[from] serde_json::Error),

    #[error("controller transport failed: {0}")]
    ControllerTransport(String),

    #[error("collaborator broke its contract: {0}")]
    LibraryContractViolation(String),
}

impl ProxyError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProxyError::LibraryContractViolation(_))
    }
}
