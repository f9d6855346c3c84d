use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    // Carries no detail so passphrases and partial plaintext never surface.
    #[error("invalid key pair")]
    InvalidKeyPair,
    #[error("unable to parse token: {0}")]
    Unparseable(String),
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),
    #[error("invalid session")]
    InvalidSession,
    #[error("request denied: {reason}")]
    PolicyDenied { reason: String },
    #[error("request forcefully denied: {reason}")]
    PolicyForcefullyDenied { reason: String },
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Coarse classification used by boundary adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    KeyMaterial,
    Authentication,
    Session,
    Authorization,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::KeyMaterial => "key-material",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Session => "session",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Internal => "internal-service-failure",
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Authentication | ErrorKind::Session => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::KeyMaterial | ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidKeyPair => ErrorKind::KeyMaterial,
            AuthError::Unparseable(_) | AuthError::InvalidClaims(_) => ErrorKind::Authentication,
            AuthError::InvalidSession => ErrorKind::Session,
            AuthError::PolicyDenied { .. } | AuthError::PolicyForcefullyDenied { .. } => {
                ErrorKind::Authorization
            }
            AuthError::Signing(_) | AuthError::InvalidConfig(_) | AuthError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Generic text safe to hand across a system boundary. Internal detail
    /// stays in `Display` for logs.
    pub fn opaque_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Authentication | ErrorKind::Session => "unauthorized",
            ErrorKind::Authorization => "forbidden",
            ErrorKind::KeyMaterial | ErrorKind::Internal => "unable to process",
        }
    }

    pub fn is_denied(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }
}
