use snafu::Snafu;

use super::ids::ConnectionId;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    /// Human-readable credential rejection; callers surface `message` verbatim.
    #[snafu(display("{message}"))]
    InvalidCredentials {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("an account for '{email}' already exists"))]
    AccountExists { stage: &'static str, email: String },
    #[snafu(display("{details}"))]
    InvalidAccount {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("backend entity '{entity}' with id '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("unsupported query: {details}"))]
    UnsupportedQuery {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("backend id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("backend invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("connection '{connection_id}' is closed"))]
    ConnectionClosed {
        stage: &'static str,
        connection_id: ConnectionId,
    },
    #[snafu(display("failed to create sqlite directory at {path}"))]
    CreateSqliteDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse sqlite connection URL '{database_url}'"))]
    SqliteConnectOptions {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to connect sqlite database '{database_url}'"))]
    SqliteConnect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to configure sqlite pragma '{pragma}'"))]
    SqlitePragma {
        stage: &'static str,
        pragma: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to run sqlite migrations"))]
    SqliteMigrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
