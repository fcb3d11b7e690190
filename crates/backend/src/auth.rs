use snafu::ensure;
use uuid::Uuid;

use super::error::{BackendResult, InvalidAccountSnafu, InvalidCredentialsSnafu};

pub const MIN_PASSWORD_LENGTH: usize = 6;

pub(crate) const INVALID_EMAIL_MESSAGE: &str = "The email address is badly formatted.";
pub(crate) const MISSING_PASSWORD_MESSAGE: &str = "A password is required.";
pub(crate) const INVALID_CREDENTIAL_MESSAGE: &str = "Invalid email or password.";

/// Accounts are keyed by their trimmed, lower-cased email.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && !domain.is_empty() && !domain.contains('@')
}

/// Shape checks run before any lookup, mirroring what a hosted identity provider
/// rejects without touching its user table.
pub(crate) fn check_sign_in_input(email: &str, password: &str) -> BackendResult<String> {
    let normalized = normalize_email(email);
    ensure!(
        is_plausible_email(&normalized),
        InvalidCredentialsSnafu {
            stage: "sign-in-validate-email",
            message: INVALID_EMAIL_MESSAGE.to_string(),
        }
    );
    ensure!(
        !password.is_empty(),
        InvalidCredentialsSnafu {
            stage: "sign-in-validate-password",
            message: MISSING_PASSWORD_MESSAGE.to_string(),
        }
    );
    Ok(normalized)
}

pub(crate) fn check_registration_input(email: &str, password: &str) -> BackendResult<String> {
    let normalized = normalize_email(email);
    ensure!(
        is_plausible_email(&normalized),
        InvalidAccountSnafu {
            stage: "register-validate-email",
            details: INVALID_EMAIL_MESSAGE.to_string(),
        }
    );
    ensure!(
        password.chars().count() >= MIN_PASSWORD_LENGTH,
        InvalidAccountSnafu {
            stage: "register-validate-password",
            details: format!("Password should be at least {MIN_PASSWORD_LENGTH} characters."),
        }
    );
    Ok(normalized)
}

pub(crate) fn rejected_credentials(stage: &'static str) -> super::error::BackendError {
    InvalidCredentialsSnafu {
        stage,
        message: INVALID_CREDENTIAL_MESSAGE.to_string(),
    }
    .build()
}

/// Salted blake3 digest of a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PasswordDigest {
    pub(crate) salt: String,
    pub(crate) digest: String,
}

impl PasswordDigest {
    pub(crate) fn derive(password: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let digest = digest_with_salt(&salt, password);
        Self { salt, digest }
    }

    pub(crate) fn verify(&self, password: &str) -> bool {
        digest_with_salt(&self.salt, password) == self.digest
    }
}

fn digest_with_salt(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}
