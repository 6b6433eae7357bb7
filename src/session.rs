//! The session state machine (spec §3 Data Model "Session", §4.1 sequence-id
//! discipline, §4.4 connect/handshake, §6 cursor contract, component C4).

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, instrument, trace, warn};

use crate::constant::{CapabilityFlags, CommandByte, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::auth;
use crate::protocol::handshake::{self, HandshakeResponse41, SslRequest};
use crate::protocol::packet::{self, MAX_FRAME_LEN};
use crate::protocol::response::{ErrPayloadBytes, OkPayload, OkPayloadBytes};

/// A transport stream: plain TCP, Unix domain socket, or (after upgrade)
/// TLS over either. Boxed so `Session` stays transport-agnostic past
/// `connect()` (spec §6: `unix_socket` and `ssl` are independent options).
trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// One logical connection to the server. Owns the sequence-id counter and
/// the reusable read/write buffers; everything above the framing layer
/// (auth, queries, result reading) is driven through this type.
pub struct Session {
    stream: Box<dyn Stream>,
    next_seq: u8,
    read_buf: Vec<u8>,
    pub capabilities: CapabilityFlags,
    pub server_status: ServerStatusFlags,
    pub connection_id: u32,
    pub server_version: String,
    last_insert_id: u64,
    affected_rows: u64,
    warnings: u16,
    max_allowed_packet: u32,
    no_backslash_escapes: bool,
    in_use: bool,
    local_infile: bool,
}

impl Session {
    /// Connect and complete the handshake (spec §4.4).
    #[instrument(skip(opts), fields(host = ?opts.host, socket = ?opts.unix_socket))]
    pub async fn connect(opts: &Opts) -> Result<Self> {
        let raw: Box<dyn Stream> = if let Some(path) = &opts.unix_socket {
            Box::new(connect_with_timeout(UnixStream::connect(path), opts.connect_timeout).await?)
        } else {
            let host = opts
                .host
                .as_deref()
                .ok_or_else(|| Error::interface("no host or unix_socket configured"))?;
            let stream =
                connect_with_timeout(TcpStream::connect((host, opts.port)), opts.connect_timeout)
                    .await?;
            if opts.tcp_nodelay {
                stream.set_nodelay(true)?;
            }
            Box::new(stream)
        };

        let mut session = Session {
            stream: raw,
            next_seq: 0,
            read_buf: Vec::new(),
            capabilities: CapabilityFlags::empty(),
            server_status: ServerStatusFlags::empty(),
            connection_id: 0,
            server_version: String::new(),
            last_insert_id: 0,
            affected_rows: 0,
            warnings: 0,
            max_allowed_packet: opts.max_allowed_packet,
            no_backslash_escapes: false,
            in_use: false,
            local_infile: opts.local_infile,
        };

        session.handshake(opts).await?;
        session.post_connect(opts).await?;
        debug!(connection_id = session.connection_id, "connected");
        Ok(session)
    }

    async fn handshake(&mut self, opts: &Opts) -> Result<()> {
        let (seq, _) = self.read_frame_raw().await?;
        let initial = handshake::read_initial_handshake(&self.read_buf)?;
        self.connection_id = initial.connection_id;
        self.server_version = initial.server_version.clone();
        self.next_seq = seq.wrapping_add(1);

        let mut client_caps = (crate::constant::CAPABILITIES_ALWAYS_ENABLED
            | (opts.client_flag & crate::constant::CAPABILITIES_CONFIGURABLE))
            & initial.capability_flags;
        if opts.database.is_some() {
            client_caps |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        }
        if !opts.program_name.is_empty() {
            client_caps |= CapabilityFlags::CLIENT_CONNECT_ATTRS;
        }
        if opts.local_infile {
            client_caps |= CapabilityFlags::CLIENT_LOCAL_FILES;
        }

        if opts.ssl {
            client_caps |= CapabilityFlags::CLIENT_SSL;
            self.upgrade_to_tls(opts, client_caps).await?;
        }

        let mut plugin_name = remap_plugin_name(opts, &initial.auth_plugin_name);
        let mut challenge = initial.auth_plugin_data.clone();
        let mut auth_response =
            compute_auth_response(&plugin_name, opts.password.as_deref().unwrap_or(""), &challenge)?;

        let attrs: Vec<(String, String)> = if client_caps.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS)
        {
            vec![
                ("_client_name".to_string(), "aiomy".to_string()),
                ("program_name".to_string(), opts.program_name.clone()),
            ]
        } else {
            Vec::new()
        };

        let response = HandshakeResponse41 {
            capability_flags: client_caps,
            max_packet_size: self.max_allowed_packet,
            charset: opts.charset,
            username: &opts.user,
            auth_response: &auth_response,
            database: opts.database.as_deref(),
            auth_plugin_name: Some(&plugin_name),
            connect_attrs: &attrs,
        };

        let mut payload = Vec::new();
        handshake::write_handshake_response(&mut payload, &response);
        self.write_packet(&payload).await?;
        self.capabilities = client_caps;

        loop {
            let (_seq, len) = self.read_frame_raw().await?;
            let payload = std::mem::take(&mut self.read_buf);
            self.read_buf.reserve(len);

            if packet::is_ok(&payload) {
                self.read_buf = payload;
                self.absorb_ok_status()?;
                return Ok(());
            }
            if packet::is_err(&payload) {
                return Err(Error::from(ErrPayloadBytes(&payload)));
            }
            if packet::is_auth_switch_request(&payload) {
                let switch = handshake::read_auth_switch_request(&payload)?;
                plugin_name = remap_plugin_name(opts, &switch.plugin_name);
                challenge = switch.plugin_data;
                auth_response = compute_auth_response(
                    &plugin_name,
                    opts.password.as_deref().unwrap_or(""),
                    &challenge,
                )?;
                self.write_packet(&auth_response).await?;
                continue;
            }
            if packet::is_extra_auth_data(&payload) {
                let extra = handshake::read_extra_auth_data(&payload)?;
                match auth::read_fast_auth_result(extra) {
                    Ok(auth::FastAuthResult::Success) => continue,
                    Ok(auth::FastAuthResult::FullAuthRequired) => {
                        let full = full_auth_response(
                            &plugin_name,
                            opts.password.as_deref().unwrap_or(""),
                            &challenge,
                            opts.server_public_key.as_deref(),
                        )?;
                        self.write_packet(&full).await?;
                        continue;
                    }
                    Err(_) => {
                        // `dialog`-style continuation prompt: answer with the
                        // configured password again.
                        self.write_packet(&auth::dialog_response(
                            opts.password.as_deref().unwrap_or(""),
                        ))
                        .await?;
                        continue;
                    }
                }
            }
            return Err(Error::internal("unexpected packet during authentication"));
        }
    }

    async fn upgrade_to_tls(&mut self, opts: &Opts, client_caps: CapabilityFlags) -> Result<()> {
        #[cfg(not(feature = "tls"))]
        {
            let _ = (opts, client_caps);
            return Err(Error::NotSupportedError(
                "built without the `tls` feature".to_string(),
            ));
        }

        #[cfg(feature = "tls")]
        {
            let ssl_request = SslRequest::new(client_caps, self.max_allowed_packet, opts.charset);
            let mut payload = Vec::new();
            handshake::write_ssl_request(&mut payload, &ssl_request);
            self.write_packet(&payload).await?;

            let host = opts.host.clone().unwrap_or_default();
            let connector = tokio_native_tls::TlsConnector::from(
                native_tls::TlsConnector::new()
                    .map_err(|e| Error::InterfaceError(format!("TLS connector init failed: {e}")))?,
            );
            let plain = std::mem::replace(&mut self.stream, Box::new(tokio::io::empty()));
            let tls_stream = connector
                .connect(&host, TlsShim(plain))
                .await
                .map_err(|e| Error::OperationalError {
                    errno: 0,
                    message: format!("TLS handshake failed: {e}"),
                })?;
            self.stream = Box::new(tls_stream);
            Ok(())
        }
    }

    async fn post_connect(&mut self, opts: &Opts) -> Result<()> {
        if !opts.sql_mode.is_empty() {
            self.execute_and_drain(&format!("SET sql_mode='{}'", opts.sql_mode.replace('\'', "''")))
                .await?;
        }
        if !opts.init_command.is_empty() {
            self.execute_and_drain(&opts.init_command).await?;
            self.execute_and_drain("COMMIT").await?;
        }
        if let Some(autocommit) = opts.autocommit {
            self.execute_and_drain(&format!("SET autocommit={}", if autocommit { 1 } else { 0 }))
                .await?;
        }
        Ok(())
    }

    /// Run `sql` and read every response it produces to completion,
    /// discarding any rows. `CLIENT_MULTI_STATEMENTS` is always negotiated
    /// (spec §9), so a semicolon-separated `init_command` produces one
    /// response per statement, chained via `SERVER_MORE_RESULTS_EXISTS`;
    /// stopping after the first would leave later statements' responses
    /// unread on the wire.
    async fn execute_and_drain(&mut self, sql: &str) -> Result<()> {
        self.dispatch_command(CommandByte::Query, sql.as_bytes())
            .await?;
        loop {
            let payload = self.read_packet().await?;
            if packet::is_err(&payload) {
                return Err(Error::from(ErrPayloadBytes(&payload)));
            }
            if packet::is_ok(&payload) {
                self.read_buf = payload;
                self.absorb_ok_status()?;
            } else {
                self.drain_resultset(&payload).await?;
            }
            if !self
                .server_status
                .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
            {
                return Ok(());
            }
        }
    }

    /// Read and discard a column-definition list plus every row of the
    /// result set it introduces, leaving `self.server_status` set from the
    /// terminating OK/EOF.
    async fn drain_resultset(&mut self, header: &[u8]) -> Result<()> {
        let (column_count, _) = crate::protocol::primitive::read_int_lenenc(header)?;
        for _ in 0..column_count {
            self.read_packet().await?;
        }
        loop {
            let payload = self.read_packet().await?;
            if packet::is_err(&payload) {
                return Err(Error::from(ErrPayloadBytes(&payload)));
            }
            if packet::is_eof(&payload) || packet::is_ok(&payload) {
                self.read_buf = payload;
                return self.absorb_ok_status();
            }
        }
    }

    fn absorb_ok_status(&mut self) -> Result<()> {
        let ok = OkPayload::try_from(OkPayloadBytes(&self.read_buf))?;
        self.server_status = ok.status_flags;
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.warnings = ok.warnings;
        self.no_backslash_escapes = ok
            .status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_NO_BACKSLASH_ESCAPES);
        Ok(())
    }

    /// Send one command packet, resetting the sequence id to 0 (spec §4.1:
    /// sequence ids restart at the start of every new command).
    pub(crate) async fn dispatch_command(&mut self, command: CommandByte, body: &[u8]) -> Result<()> {
        self.next_seq = 0;
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(command as u8);
        payload.extend_from_slice(body);
        self.write_packet(&payload).await
    }

    async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (framed, next_seq) = packet::encode_fragmented(payload, self.next_seq);
        self.next_seq = next_seq;
        trace!(len = payload.len(), "write_packet");
        self.stream.write_all(&framed).await.map_err(|_| Error::server_lost())?;
        self.stream.flush().await.map_err(|_| Error::server_lost())?;
        Ok(())
    }

    /// Read one frame, enforcing the sequence-id discipline (spec §4.1): a
    /// seq id other than the expected next value is a protocol violation,
    /// except that seq 0 where a continuation was expected means the server
    /// dropped the connection mid-command.
    async fn read_frame_raw(&mut self) -> Result<(u8, usize)> {
        let (seq, len) = packet::read_one_frame(&mut self.stream, &mut self.read_buf).await?;
        if seq != self.next_seq {
            if seq == 0 {
                return Err(Error::server_lost());
            }
            return Err(Error::internal(format!(
                "sequence id mismatch: expected {}, got {seq}",
                self.next_seq
            )));
        }
        self.next_seq = seq.wrapping_add(1);
        Ok((seq, len))
    }

    /// Read one logical packet, stitching fragmented frames back together
    /// (spec §4.1: a packet exactly `MAX_FRAME_LEN` bytes long is always
    /// followed by one more frame, empty or not).
    pub(crate) async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let (_seq, len) = self.read_frame_raw().await?;
        let mut payload = self.read_buf[..len].to_vec();
        if len == MAX_FRAME_LEN {
            loop {
                let (_seq, len) = self.read_frame_raw().await?;
                payload.extend_from_slice(&self.read_buf[..len]);
                if len < MAX_FRAME_LEN {
                    break;
                }
            }
        }
        Ok(payload)
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warning_count(&self) -> u16 {
        self.warnings
    }

    pub fn in_transaction(&self) -> bool {
        self.server_status.contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
    }

    pub fn autocommit(&self) -> bool {
        self.server_status.contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT)
    }

    pub fn mark_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Whether this session negotiated `CLIENT_LOCAL_FILES` (spec §6
    /// `local_infile`). A server-sent `LOAD DATA LOCAL INFILE` request is
    /// only honored when this is true, so a malicious or compromised
    /// server can't read arbitrary local files from a connection that
    /// never opted in.
    pub fn local_infile_enabled(&self) -> bool {
        self.local_infile
    }

    /// Escape a value for textual inclusion in a statement (spec §6).
    pub fn escape(&self, value: &crate::value::Value) -> Result<String> {
        value.escape(self.no_backslash_escapes)
    }

    pub fn max_allowed_packet(&self) -> u32 {
        self.max_allowed_packet
    }

    pub(crate) fn absorb_result_status(&mut self, ok: &crate::protocol::response::OkPayload) {
        self.server_status = ok.status_flags;
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.warnings = ok.warnings;
    }

    /// Continue the in-flight command with one more raw frame, without
    /// resetting the sequence counter (used by the `LOAD DATA LOCAL INFILE`
    /// sub-protocol, spec §4.5.1).
    pub(crate) async fn dispatch_raw_frame(&mut self, chunk: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(chunk.len() + 4);
        packet::write_frame_header(&mut out, self.next_seq, chunk.len());
        out.extend_from_slice(chunk);
        self.next_seq = self.next_seq.wrapping_add(1);
        self.stream.write_all(&out).await.map_err(|_| Error::server_lost())?;
        self.stream.flush().await.map_err(|_| Error::server_lost())
    }

    pub(crate) async fn dispatch_empty_frame(&mut self) -> Result<()> {
        self.dispatch_raw_frame(&[]).await
    }

    /// `COM_PING`: used both as a public health check and by the pool's
    /// liveness probe before handing a recycled session back out.
    #[instrument(skip(self))]
    pub async fn ping(&mut self) -> Result<()> {
        self.dispatch_command(CommandByte::Ping, &[]).await?;
        let payload = self.read_packet().await?;
        if packet::is_err(&payload) {
            return Err(Error::from(ErrPayloadBytes(&payload)));
        }
        self.read_buf = payload;
        self.absorb_ok_status()
    }

    /// Graceful shutdown: `COM_QUIT` then drop (spec §6 `close`).
    #[instrument(skip(self))]
    pub async fn ensure_closed(mut self) {
        self.next_seq = 0;
        let payload = vec![CommandByte::Quit as u8];
        let (framed, _) = packet::encode_fragmented(&payload, 0);
        if let Err(e) = self.stream.write_all(&framed).await {
            warn!(error = %e, "error sending COM_QUIT during graceful close");
        }
    }
}

async fn connect_with_timeout<F, T>(fut: F, timeout: Duration) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::OperationalError {
            errno: 0,
            message: "connection attempt timed out".to_string(),
        })?
        .map_err(Error::Io)
}

/// Apply `opts.auth_plugin_map`, letting the caller override the plugin the
/// server advertised (e.g. for proxies that misreport it).
fn remap_plugin_name(opts: &Opts, server_plugin_name: &str) -> String {
    opts.auth_plugin_map
        .get(server_plugin_name)
        .cloned()
        .unwrap_or_else(|| server_plugin_name.to_string())
}

fn compute_auth_response(plugin_name: &str, password: &str, challenge: &[u8]) -> Result<Vec<u8>> {
    Ok(match plugin_name {
        "mysql_native_password" => auth::native_password_scramble(password, challenge),
        "caching_sha2_password" | "sha256_password" => {
            auth::sha2_password_scramble(password, challenge)
        }
        "mysql_clear_password" => auth::clear_password_response(password),
        "mysql_old_password" => auth::old_password_scramble(password, challenge),
        "client_ed25519" => auth::ed25519_sign(password, challenge),
        "dialog" => auth::dialog_response(password),
        other => {
            return Err(Error::NotSupportedError(format!(
                "unsupported auth plugin: {other}"
            )));
        }
    })
}

fn full_auth_response(
    plugin_name: &str,
    password: &str,
    challenge: &[u8],
    server_public_key: Option<&str>,
) -> Result<Vec<u8>> {
    match plugin_name {
        "caching_sha2_password" | "sha256_password" => {
            let key = server_public_key.ok_or_else(|| {
                Error::InterfaceError(
                    "server requested full authentication but no server_public_key is configured"
                        .to_string(),
                )
            })?;
            auth::rsa_encrypt_password(password, challenge, key)
        }
        other => Err(Error::NotSupportedError(format!(
            "unsupported full-auth plugin: {other}"
        ))),
    }
}

/// Adapts `Box<dyn Stream>` to the concrete type `tokio_native_tls` expects
/// to wrap: any `AsyncRead + AsyncWrite + Unpin`.
struct TlsShim(Box<dyn Stream>);

impl AsyncRead for TlsShim {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsShim {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_shutdown(cx)
    }
}
