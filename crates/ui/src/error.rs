use chirp_client::{ClientError, ClientResult};
use gpui_tokio_bridge::JoinError;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum UiError {
    /// Rendered as the client error alone so auth messages reach the user verbatim.
    #[snafu(display("{source}"))]
    Client {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("background task failed on `{stage}`: {source}"))]
    TaskJoin {
        stage: &'static str,
        source: JoinError,
    },
}

pub type UiResult<T> = Result<T, UiError>;

/// Flattens the result of a client call that ran on the tokio bridge.
pub fn settle<T>(result: Result<ClientResult<T>, JoinError>, stage: &'static str) -> UiResult<T> {
    result
        .context(TaskJoinSnafu { stage })?
        .context(ClientSnafu { stage })
}
