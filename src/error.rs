//! Error taxonomy.
//!
//! Mirrors the DB-API-flavoured hierarchy used by MySQL client drivers: a
//! catch-all `Warning`, an `InterfaceError` for misuse of the driver itself,
//! and a `DatabaseError` family split by what went wrong on the wire or on
//! the server (see spec §7).

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Well-known client-side error codes, named the way MySQL client libraries
/// name them (`CR_*`).
pub mod cr {
    pub const CR_SERVER_LOST: u16 = 2013;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Warning(String),

    /// Misuse of the driver: no connection, pool misuse, bad arguments.
    #[error("{0}")]
    InterfaceError(String),

    #[error("{0}")]
    DataError(String),

    /// Errors related to the database's operation, not necessarily under
    /// the control of the programmer: lost connection, deadlock, access
    /// denied, framing violations.
    #[error("{message} (errno {errno})")]
    OperationalError { errno: u16, message: String },

    #[error("{0}")]
    IntegrityError(String),

    /// Internal protocol inconsistency: unexpected sequence id, malformed
    /// packet, a packet that doesn't match the expected kind.
    #[error("{0}")]
    InternalError(String),

    #[error("{0}")]
    ProgrammingError(String),

    #[error("{0}")]
    NotSupportedError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn server_lost() -> Self {
        Error::OperationalError {
            errno: cr::CR_SERVER_LOST,
            message: "Lost connection to MySQL server during query".to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::InternalError(msg.into())
    }

    pub fn interface(msg: impl Into<String>) -> Self {
        Error::InterfaceError(msg.into())
    }

    /// Classify a server ERR packet's errno/sqlstate into the taxonomy (spec
    /// §7). Only a representative subset of MySQL's error codes is named
    /// explicitly; everything else falls back to the `errno` threshold rule.
    pub fn from_server_error(errno: u16, sqlstate: &str, message: &str) -> Self {
        let full = format!("{message} (errno {errno}, sqlstate {sqlstate})");
        match errno {
            1062 | 1451 | 1452 => Error::IntegrityError(full), // dup entry / FK violation
            1064 | 1054 | 1146 => Error::ProgrammingError(full), // syntax / bad field / no such table
            1044 | 1045 | 1142 | 1143 => Error::OperationalError { errno, message: full }, // access denied
            1213 => Error::OperationalError { errno, message: full },                      // deadlock
            1265 | 1366 => Error::DataError(full),                                        // truncation
            1235 => Error::NotSupportedError(full),
            _ if errno < 1000 => Error::InternalError(full),
            _ => Error::OperationalError { errno, message: full },
        }
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}

impl<Src, Dst: ?Sized> From<zerocopy::CastError<Src, Dst>> for Error {
    fn from(err: zerocopy::CastError<Src, Dst>) -> Self {
        Self::internal(format!("{err:?}"))
    }
}
