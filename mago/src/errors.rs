use backtrace::Backtrace;
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Error kinds for mago operations.
///
/// Each kind names one category of failure so callers can tell a usage error
/// (an entity the session does not know about) apart from a store failure or a
/// transaction that needs recovery.
///
/// # Examples
///
/// ```rust,ignore
/// use mago::errors::{MagoError, ErrorKind, MagoResult};
///
/// fn example() -> MagoResult<()> {
///     Err(MagoError::new("entity is not in session", ErrorKind::NotTracked))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Session Errors
    /// The entity is not tracked by the session
    NotTracked,

    // Attribute Errors
    /// An attribute name or value was rejected
    ValidationError,

    // ID Errors
    /// The provided ID is invalid
    InvalidId,
    /// The requested document was not found
    NotFound,

    // Store Errors
    /// A store primitive (insert, replace, remove, lookup) failed
    PersistenceFailure,

    // Transaction Errors
    /// A transaction failed and its effects were rolled back
    TransactionFailed,
    /// A transaction failed and could not be rolled back; its log record must be recovered
    RecoveryRequired,

    // Operation Errors
    /// The operation is not valid in the current context
    InvalidOperation,

    // Data Encoding Errors
    /// Error mapping a value to or from its serialized form
    ObjectMappingError,

    // Generic/Internal Errors
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotTracked => write!(f, "Not tracked"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::InvalidId => write!(f, "Invalid ID"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::PersistenceFailure => write!(f, "Persistence failure"),
            ErrorKind::TransactionFailed => write!(f, "Transaction failed"),
            ErrorKind::RecoveryRequired => write!(f, "Recovery required"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::ObjectMappingError => write!(f, "Object mapping error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom mago error type.
///
/// `MagoError` carries a message, a kind and an optional cause, so a failure
/// raised deep inside a store write can surface from `commit()` still attached
/// to the error that explains what the caller must do next.
///
/// # Examples
///
/// ```rust,ignore
/// use mago::errors::{MagoError, ErrorKind};
///
/// let cause = MagoError::new("disk unavailable", ErrorKind::PersistenceFailure);
/// let err = MagoError::new_with_cause("Commit failed", ErrorKind::TransactionFailed, cause);
/// ```
#[derive(Clone)]
pub struct MagoError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<MagoError>>,
    backtrace: Arc<Mutex<Backtrace>>,
}

impl MagoError {
    /// Creates a new `MagoError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        MagoError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    /// Creates a new `MagoError` with a cause error.
    ///
    /// The cause is preserved and reachable through [`Error::source`].
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: MagoError) -> Self {
        MagoError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&MagoError> {
        self.cause.as_deref()
    }

    /// Walks the cause chain and returns the innermost error.
    pub fn root_cause(&self) -> &MagoError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl Display for MagoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for MagoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => {
                let mut backtrace = self.backtrace.lock();
                backtrace.resolve();
                write!(f, "{}\n{:?}", self.message, *backtrace)
            }
        }
    }
}

impl Error for MagoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for mago operations.
pub type MagoResult<T> = Result<T, MagoError>;

#[cfg(feature = "serde")]
impl serde::de::Error for MagoError {
    fn custom<T: Display>(msg: T) -> Self {
        MagoError::new(&msg.to_string(), ErrorKind::ObjectMappingError)
    }
}

#[cfg(feature = "serde")]
impl serde::ser::Error for MagoError {
    fn custom<T: Display>(msg: T) -> Self {
        MagoError::new(&msg.to_string(), ErrorKind::ObjectMappingError)
    }
}

impl From<std::io::Error> for MagoError {
    fn from(err: std::io::Error) -> Self {
        MagoError::new(&format!("IO error: {}", err), ErrorKind::PersistenceFailure)
    }
}

impl From<String> for MagoError {
    fn from(msg: String) -> Self {
        MagoError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for MagoError {
    fn from(msg: &str) -> Self {
        MagoError::new(msg, ErrorKind::InternalError)
    }
}
