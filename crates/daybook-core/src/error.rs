use std::fmt;

/// Machine-readable error codes surfaced next to human-readable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotSignedIn,
    ConfigParseError,
    RecordNotFound,
    PlaceholderPending,
    RemoteNetwork,
    RemotePermission,
    RemoteConstraint,
    RemoteNotFound,
    MalformedChange,
    Cancelled,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotSignedIn => "E1001",
            Self::ConfigParseError => "E1002",
            Self::RecordNotFound => "E2001",
            Self::PlaceholderPending => "E2002",
            Self::RemoteNetwork => "E3001",
            Self::RemotePermission => "E3002",
            Self::RemoteConstraint => "E3003",
            Self::RemoteNotFound => "E3004",
            Self::MalformedChange => "E4001",
            Self::Cancelled => "E5001",
        }
    }

    /// Short human-facing summary for logs and UI banners.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotSignedIn => "No signed-in owner",
            Self::ConfigParseError => "Config file parse error",
            Self::RecordNotFound => "Record not found",
            Self::PlaceholderPending => "Record is still being created",
            Self::RemoteNetwork => "Remote store unreachable",
            Self::RemotePermission => "Remote store denied the write",
            Self::RemoteConstraint => "Remote store rejected the write",
            Self::RemoteNotFound => "Record no longer exists remotely",
            Self::MalformedChange => "Malformed change event",
            Self::Cancelled => "Synchronizer was torn down",
        }
    }

    /// Optional remediation hint that can be shown alongside the error.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotSignedIn => Some("Sign in before editing."),
            Self::ConfigParseError => Some("Fix syntax in .daybook/config.toml and retry."),
            Self::RecordNotFound | Self::MalformedChange | Self::Cancelled => None,
            Self::PlaceholderPending => Some("Wait for the create to finish, then retry."),
            Self::RemoteNetwork => Some("Check connectivity and retry the action."),
            Self::RemotePermission => Some("Refresh the session; the record may belong to someone else."),
            Self::RemoteConstraint => Some("Adjust the input and retry."),
            Self::RemoteNotFound => Some("Refresh to pick up the latest records."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Classification of a remote-store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    Network,
    Permission,
    Constraint,
    NotFound,
}

impl RemoteErrorKind {
    #[must_use]
    pub const fn code(self) -> ErrorCode {
        match self {
            Self::Network => ErrorCode::RemoteNetwork,
            Self::Permission => ErrorCode::RemotePermission,
            Self::Constraint => ErrorCode::RemoteConstraint,
            Self::NotFound => ErrorCode::RemoteNotFound,
        }
    }
}

/// Structured error returned by a remote store call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
    /// Provider-specific code (e.g. a SQLSTATE), when one was reported.
    pub code: Option<String>,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Network, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Permission, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Constraint, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotFound, message)
    }
}

/// Errors produced by the synchronizer.
///
/// None of these escape as panics: the async layer converts each one into a
/// `false` outcome plus an error string on the collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("no signed-in owner")]
    NotSignedIn,
    #[error("record {0} not found in the local collection")]
    NotFound(String),
    #[error("record {0} is still being created")]
    PlaceholderPending(String),
    #[error("remote call failed: {0}")]
    Remote(#[from] RemoteError),
    #[error("synchronizer was torn down before the write settled")]
    Cancelled,
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotSignedIn => ErrorCode::NotSignedIn,
            Self::NotFound(_) => ErrorCode::RecordNotFound,
            Self::PlaceholderPending(_) => ErrorCode::PlaceholderPending,
            Self::Remote(err) => err.kind.code(),
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    /// Human-readable text stored on the collection for the UI to display.
    #[must_use]
    pub fn display_message(&self) -> String {
        format!("{}: {self}", self.code())
    }
}
