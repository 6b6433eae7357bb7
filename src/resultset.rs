//! Result-set reading: buffered and unbuffered ("streaming") modes, the
//! `LOAD DATA LOCAL INFILE` sub-protocol, and multi-resultset traversal
//! (spec §4.5, component C5).

use tokio::io::AsyncReadExt;

use crate::constant::{CommandByte, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::column::FieldDescriptor;
use crate::protocol::packet;
use crate::protocol::primitive::{read_int_lenenc, read_string_lenenc};
use crate::protocol::response::{ErrPayloadBytes, OkPayload, OkPayloadBytes};
use crate::session::Session;
use crate::value::Value;

/// Sentinel MySQLdb uses for `affected_rows()` while a result set is being
/// streamed row by row rather than counted up front (spec §4.5).
pub const UNBUFFERED_AFFECTED_ROWS_SENTINEL: u64 = u64::MAX;

/// What a `COM_QUERY` produced: either it ran to completion with no rows
/// (`Done`), or it opened a result set the caller reads row by row
/// (`Rows`).
pub enum QueryOutcome<'s> {
    Done(OkPayload),
    Rows(ResultSet<'s>),
}

/// An open, unbuffered result set. Dropping it without reading to
/// completion leaves the session's read side out of sync with the wire;
/// callers that want to abandon a result set early should use
/// [`ResultSet::drain`].
pub struct ResultSet<'s> {
    session: &'s mut Session,
    fields: Vec<FieldDescriptor>,
    done: bool,
}

impl<'s> ResultSet<'s> {
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// MySQLdb convention: `affected_rows` reads as `u64::MAX` while a
    /// result set is being streamed (spec §4.5).
    pub fn affected_rows(&self) -> u64 {
        UNBUFFERED_AFFECTED_ROWS_SENTINEL
    }

    /// Read the next row, or `None` once the terminating OK/EOF has been
    /// consumed.
    pub async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }

        let payload = self.session.read_packet().await?;
        if packet::is_err(&payload) {
            self.done = true;
            return Err(Error::from(ErrPayloadBytes(&payload)));
        }
        if packet::is_eof(&payload) || packet::is_ok(&payload) {
            self.done = true;
            let ok = OkPayload::try_from(OkPayloadBytes(&payload))?;
            self.session.absorb_result_status(&ok);
            return Ok(None);
        }

        let mut data = payload.as_slice();
        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let (text, rest) = read_string_lenenc(data)?;
            row.push(Value::decode_text(field, text)?);
            data = rest;
        }
        Ok(Some(row))
    }

    /// Whether another result set follows this one (spec §4.5,
    /// `SERVER_MORE_RESULTS_EXISTS`). Only meaningful once this result set
    /// has been fully read.
    pub fn has_next(&self) -> bool {
        self.done
            && self
                .session
                .server_status
                .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    /// Drain any remaining rows without decoding them, then advance to the
    /// next result set if one follows.
    pub async fn next_result(mut self) -> Result<Option<QueryOutcome<'s>>> {
        while self.next_row().await?.is_some() {}
        if !self
            .session
            .server_status
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
        {
            return Ok(None);
        }
        Ok(Some(read_query_outcome(self.session).await?))
    }

    /// Abandon this result set, discarding remaining rows.
    pub async fn drain(mut self) -> Result<()> {
        while self.next_row().await?.is_some() {}
        Ok(())
    }
}

/// A fully materialized result set (`Session::query_buffered`).
#[derive(Debug, Clone)]
pub struct BufferedResultSet {
    pub fields: Vec<FieldDescriptor>,
    pub rows: Vec<Vec<Value>>,
}

/// Run `sql` and return every result set it produced, fully buffered.
pub async fn query_buffered(session: &mut Session, sql: &str) -> Result<Vec<BufferedResultSet>> {
    let mut out = Vec::new();
    let mut outcome = query(session, sql).await?;
    loop {
        match outcome {
            QueryOutcome::Done(_) => break,
            QueryOutcome::Rows(mut rs) => {
                let fields = rs.fields().to_vec();
                let mut rows = Vec::new();
                while let Some(row) = rs.next_row().await? {
                    rows.push(row);
                }
                out.push(BufferedResultSet { fields, rows });
                match rs.next_result().await? {
                    Some(next) => outcome = next,
                    None => break,
                }
            }
        }
    }
    Ok(out)
}

/// Run `sql` and return the first outcome (spec §4.5 entry point for
/// unbuffered/streaming consumption).
pub async fn query<'s>(session: &'s mut Session, sql: &str) -> Result<QueryOutcome<'s>> {
    session
        .dispatch_command(CommandByte::Query, sql.as_bytes())
        .await?;
    read_query_outcome(session).await
}

async fn read_query_outcome(session: &mut Session) -> Result<QueryOutcome<'_>> {
    let payload = session.read_packet().await?;

    if packet::is_err(&payload) {
        return Err(Error::from(ErrPayloadBytes(&payload)));
    }
    if packet::is_ok(&payload) {
        let ok = OkPayload::try_from(OkPayloadBytes(&payload))?;
        session.absorb_result_status(&ok);
        return Ok(QueryOutcome::Done(ok));
    }
    if packet::is_local_infile(&payload) {
        handle_local_infile(session, &payload).await?;
        // The server follows the LOCAL INFILE exchange with one final OK/ERR.
        let payload = session.read_packet().await?;
        if packet::is_err(&payload) {
            return Err(Error::from(ErrPayloadBytes(&payload)));
        }
        let ok = OkPayload::try_from(OkPayloadBytes(&payload))?;
        session.absorb_result_status(&ok);
        return Ok(QueryOutcome::Done(ok));
    }

    let (column_count, _) = read_int_lenenc(&payload)?;
    let mut fields = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let field_payload = session.read_packet().await?;
        fields.push(FieldDescriptor::parse(&field_payload)?);
    }
    // CLIENT_DEPRECATE_EOF servers skip the EOF after the column list; this
    // driver always negotiates it (spec §9), so no explicit EOF read here.

    Ok(QueryOutcome::Rows(ResultSet {
        session,
        fields,
        done: false,
    }))
}

/// `LOAD DATA LOCAL INFILE` (spec §4.5.1): the server names a local file in
/// the `0xFB`-prefixed packet; the client streams it back in
/// `min(max_allowed_packet, 16 KiB)` chunks, then a trailing empty frame. A
/// local I/O error still requires the empty frame so the server's response
/// can be read and the wire stays in sync.
async fn handle_local_infile(session: &mut Session, payload: &[u8]) -> Result<()> {
    if !session.local_infile_enabled() {
        session.dispatch_empty_frame().await?;
        return Err(Error::InterfaceError(
            "server requested LOAD DATA LOCAL INFILE but local_infile is disabled".to_string(),
        ));
    }

    let filename = String::from_utf8_lossy(&payload[1..]).to_string();
    let chunk_size = (session.max_allowed_packet() as usize).min(16 * 1024);

    let io_result = stream_local_file(session, &filename, chunk_size).await;
    session.dispatch_empty_frame().await?;
    io_result
}

async fn stream_local_file(session: &mut Session, filename: &str, chunk_size: usize) -> Result<()> {
    let mut file = tokio::fs::File::open(filename).await?;
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        session.dispatch_raw_frame(&buf[..n]).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbuffered_sentinel_is_max_u64() {
        assert_eq!(UNBUFFERED_AFFECTED_ROWS_SENTINEL, u64::MAX);
    }
}
