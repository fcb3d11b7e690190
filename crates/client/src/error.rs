use chirp_backend::BackendError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    /// Credential rejection; `message` is shown to the user as-is.
    #[snafu(display("{message}"))]
    AuthFailure {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("remote write '{operation}' failed on `{stage}`: {source}"))]
    RemoteWrite {
        stage: &'static str,
        operation: &'static str,
        source: BackendError,
    },
    #[snafu(display("remote read '{operation}' failed on `{stage}`: {source}"))]
    RemoteRead {
        stage: &'static str,
        operation: &'static str,
        source: BackendError,
    },
    #[snafu(display("presence update failed on `{stage}`: {source}"))]
    PresenceWrite {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("failed to subscribe to the chat feed on `{stage}`: {source}"))]
    Subscribe {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("no signed-in session on `{stage}`"))]
    NotSignedIn { stage: &'static str },
    #[snafu(display("failed to open the {backend} backend on `{stage}`: {source}"))]
    BackendOpen {
        stage: &'static str,
        backend: &'static str,
        source: BackendError,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// True when the backend no longer accepts this identity, so the session
    /// has to be treated as signed out.
    pub fn ends_session(&self) -> bool {
        match self {
            Self::NotSignedIn { .. } => true,
            Self::RemoteWrite { source, .. } | Self::RemoteRead { source, .. } => {
                matches!(source, BackendError::InvalidCredentials { .. })
            }
            _ => false,
        }
    }
}
