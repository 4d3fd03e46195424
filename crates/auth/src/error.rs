use thiserror::Error;

/// Authentication failures.
///
/// `InvalidCredentials` covers both an unknown username and a wrong password;
/// callers cannot tell the two apart.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("could not validate credentials")]
    InvalidToken,

    #[error("inactive user")]
    InactiveAccount,
}
