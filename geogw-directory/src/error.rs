use geogw_core::GatewayError;

/// Errors raised by directory access and account management.
#[derive(Debug)]
pub enum DirectoryError {
    /// The bind failed because the credentials are wrong.
    InvalidCredentials,
    /// The directory server could not be reached (or timed out).
    Unavailable(String),
    /// An entry with this username already exists.
    DuplicateUsername(String),
    /// More than one (or a conflicting) entry holds this email.
    DuplicateEmail(String),
    /// Organization provisioning failed; the user entry was rolled back.
    OrgProvisioningFailed(String),
    /// Role provisioning failed; the user entry was rolled back.
    RoleProvisioningFailed(String),
    /// Any other failed directory operation.
    Operation(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::InvalidCredentials => write!(f, "invalid credentials"),
            DirectoryError::Unavailable(msg) => write!(f, "directory unavailable: {msg}"),
            DirectoryError::DuplicateUsername(name) => write!(f, "duplicate username: {name}"),
            DirectoryError::DuplicateEmail(email) => write!(f, "duplicate email: {email}"),
            DirectoryError::OrgProvisioningFailed(msg) => {
                write!(f, "organization provisioning failed: {msg}")
            }
            DirectoryError::RoleProvisioningFailed(msg) => {
                write!(f, "role provisioning failed: {msg}")
            }
            DirectoryError::Operation(msg) => write!(f, "directory operation failed: {msg}"),
        }
    }
}

impl std::error::Error for DirectoryError {}

impl From<DirectoryError> for GatewayError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::InvalidCredentials => GatewayError::InvalidCredentials,
            DirectoryError::Unavailable(msg) => GatewayError::DirectoryUnavailable(msg),
            DirectoryError::DuplicateUsername(name) => GatewayError::DuplicateUsername(name),
            DirectoryError::DuplicateEmail(email) => GatewayError::DuplicateEmail(email),
            DirectoryError::OrgProvisioningFailed(msg)
            | DirectoryError::RoleProvisioningFailed(msg)
            | DirectoryError::Operation(msg) => GatewayError::AuthenticationFailed(msg),
        }
    }
}
