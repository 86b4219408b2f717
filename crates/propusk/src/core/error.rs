use thiserror::Error;

/// Centralized error taxonomy for the login provider.
///
/// Every fallible operation in the crate reports one of these kinds, and
/// callers branch on the variant, never on message text. The OAuth2
/// rejection mapping in [`crate::login`] consumes exactly this taxonomy,
/// so a new variant here means a new row there.
///
/// Infrastructure errors (sqlx, redis) fold into `Unexpected` via the
/// `From` impls below unless the call site knows a more precise kind.
/// HTTP client errors are mapped at the call site because the right kind
/// depends on who was called and how it failed.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Telegram auth payload failed parsing, signature or freshness checks
    #[error("invalid telegram auth data: {0}")]
    InvalidAuthData(String),

    /// The signature hash was already consumed within the replay window
    #[error("auth data has already been used")]
    ReplayDetected,

    /// Bot token does not have the `<digits>:<suffix>` shape
    #[error("bot token is malformed")]
    TokenMalformed,

    /// Bot token was rejected by the Telegram Bot API
    #[error("bot token is invalid")]
    TokenInvalid,

    /// A referenced object does not exist
    #[error("{object} with id '{id}' not found")]
    ObjectNotFound { object: &'static str, id: String },

    /// A referenced object exists but one of its fields is unusable
    #[error("{} has invalid field '{}'{}", .object, .field, .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ObjectInvalid {
        object: &'static str,
        field: &'static str,
        reason: Option<String>,
    },

    /// State that must be unique already exists or contradicts the request
    #[error("{0} already exists")]
    Conflict(&'static str),

    /// An upstream service answered with a server-side failure
    #[error("{0} is unavailable")]
    BadGateway(&'static str),

    /// An upstream service did not answer within the deadline
    #[error("{0} request timed out")]
    GatewayTimeout(&'static str),

    /// Anything without a more precise classification
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AuthError {
    /// Shorthand for `ObjectInvalid` without a reason.
    pub fn invalid_field(object: &'static str, field: &'static str) -> Self {
        AuthError::ObjectInvalid { object, field, reason: None }
    }

    /// Shorthand for `ObjectNotFound`.
    pub fn not_found(object: &'static str, id: impl ToString) -> Self {
        AuthError::ObjectNotFound { object, id: id.to_string() }
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // 23505 = unique_violation
            if db.code().as_deref() == Some("23505") {
                return AuthError::Conflict("record");
            }
        }
        AuthError::Unexpected(format!("database error: {err}"))
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        AuthError::Unexpected(format!("redis error: {err}"))
    }
}

/// Type alias for Result with AuthError
pub type AuthResult<T> = Result<T, AuthError>;
