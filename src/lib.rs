//! An async MySQL/MariaDB client driver.
//!
//! Layered bottom-up: [`protocol::packet`] frames bytes, [`protocol::primitive`]
//! reads/writes typed fields within a frame, [`protocol::auth`] and
//! [`protocol::handshake`] establish a connection, [`session::Session`] drives
//! the command/response state machine, [`resultset`] reads query results, and
//! [`pool::Pool`] manages a bounded set of sessions.

pub mod constant;
pub mod error;
pub mod opts;
pub mod pool;
pub mod protocol;
pub mod resultset;
pub mod session;
pub mod value;

pub use error::{Error, Result};
pub use opts::Opts;
pub use pool::Pool;
pub use resultset::{BufferedResultSet, QueryOutcome, ResultSet};
pub use session::Session;
pub use value::Value;
