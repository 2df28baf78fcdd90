// Copyright 2025 Sharding Proxy Project
// Licensed under the Apache License, Version 2.0

//! Listener and connection lifecycle
//!
//! One task per client connection. The connection runs the protocol state
//! machine: handshake, auth negotiation (switch / more-data), then the
//! command loop. A disconnect cancels the connection's outstanding scatter
//! work through its [`CancelFlag`].

use crate::dispatcher::{BackendDispatcher, CancelFlag};
use crate::executor::Executor;
use crate::session::Session;
use crate::stmt::StmtRegistry;
use dashmap::DashMap;
use proxy_catalog::Catalog;
use proxy_common::{Config, ProxyError, Result};
use proxy_mysql::auth::{verify_caching_sha2, verify_native_password};
use proxy_mysql::constants::*;
use proxy_mysql::conn::decode_stmt_execute;
use proxy_mysql::packet::PacketReader;
use proxy_mysql::resultset::QueryResult;
use proxy_mysql::{Command, Conn, FlowCounter, HandshakeResponse, InitialHandshake};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub struct ProxyServer {
    config: Config,
    catalog: Arc<Catalog>,
    dispatcher: Arc<dyn BackendDispatcher>,
    flow: FlowCounter,
    connections: DashMap<u32, CancelFlag>,
    connection_counter: AtomicU32,
}

impl ProxyServer {
    pub fn new(
        config: Config,
        catalog: Arc<Catalog>,
        dispatcher: Arc<dyn BackendDispatcher>,
    ) -> ProxyServer {
        ProxyServer {
            config,
            catalog,
            dispatcher,
            flow: FlowCounter::new(),
            connections: DashMap::new(),
            connection_counter: AtomicU32::new(1),
        }
    }

    /// Total bytes written to clients, across all connections.
    pub fn write_flow(&self) -> u64 {
        self.flow.total()
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.query_port);
        let listener = TcpListener::bind(&addr).await?;
        info!(%addr, "proxy listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            if self.connections.len() >= self.config.max_connections {
                warn!(%peer, "connection limit reached, rejecting");
                drop(socket);
                continue;
            }
            let connection_id = self.connection_counter.fetch_add(1, Ordering::SeqCst);
            let server = self.clone();
            tokio::spawn(async move {
                debug!(connection_id, %peer, "connection established");
                if let Err(e) = server.serve_connection(socket, connection_id).await {
                    debug!(connection_id, error = %e, "connection closed");
                }
            });
        }
    }

    /// Runs the full protocol state machine over one stream. Generic over
    /// the transport so tests can drive it through an in-memory duplex.
    pub async fn serve_connection<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        stream: S,
        connection_id: u32,
    ) -> Result<()> {
        let cancel = CancelFlag::new();
        self.connections.insert(connection_id, cancel.clone());
        let result = self
            .run_connection(stream, connection_id, cancel.clone())
            .await;
        // Client gone: cancel whatever is still in flight.
        cancel.cancel();
        self.connections.remove(&connection_id);
        result
    }

    async fn run_connection<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        stream: S,
        connection_id: u32,
        cancel: CancelFlag,
    ) -> Result<()> {
        let mut conn = Conn::new(stream, self.flow.clone());
        let response = match self.authenticate(&mut conn, connection_id).await {
            Ok(response) => response,
            Err(e) => {
                conn.write_err(&e).await.ok();
                return Err(e);
            }
        };

        let mut session = Session::new(response.database.clone());
        let mut registry = StmtRegistry::new();
        let executor = Executor::new(
            self.catalog.clone(),
            self.dispatcher.clone(),
            self.config.default_data_source.clone(),
        );
        info!(connection_id, user = %response.username, "authenticated");

        loop {
            conn.reset_sequence();
            let payload = match conn.read_packet().await {
                Ok(payload) => payload,
                Err(_) => {
                    debug!(connection_id, "client disconnected");
                    break;
                }
            };
            let command = Command::parse(&payload)?;
            match command {
                Command::Quit => break,
                Command::Ping => {
                    conn.write_ok_packet(0, 0, session.status_flags(), 0).await?;
                }
                Command::InitDb(db) => {
                    let snapshot = self.catalog.snapshot();
                    if snapshot.has_schema(&db) || snapshot.table_count() == 0 {
                        session.current_schema = Some(db);
                        conn.write_ok_packet(0, 0, session.status_flags(), 0).await?;
                    } else {
                        conn.write_err_packet(1049, "42000", &format!("Unknown database '{db}'"))
                            .await?;
                    }
                }
                Command::Query(sql) => {
                    debug!(connection_id, %sql, "query");
                    match executor.execute_query(&sql, &mut session, &cancel).await {
                        Ok(result) => self.write_result(&mut conn, &session, result).await?,
                        Err(ProxyError::Cancelled) => break,
                        Err(e) => conn.write_err(&e).await?,
                    }
                }
                Command::FieldList(_) => {
                    conn.write_eof_packet(session.status_flags(), 0).await?;
                    conn.flush().await?;
                }
                Command::StmtPrepare(sql) => {
                    let snapshot = self.catalog.snapshot();
                    match registry.prepare(&sql, &snapshot, session.current_schema.as_deref()) {
                        Ok(stmt) => {
                            let (id, params, columns) =
                                (stmt.id, stmt.params.clone(), stmt.columns.clone());
                            conn.write_prepare_response(
                                id,
                                &params,
                                &columns,
                                session.status_flags(),
                            )
                            .await?;
                        }
                        Err(e) => conn.write_err(&e).await?,
                    }
                }
                Command::StmtExecute(payload) => {
                    match self
                        .execute_stmt(&payload, &registry, &executor, &mut session, &cancel)
                        .await
                    {
                        Ok(result) => self.write_result(&mut conn, &session, result).await?,
                        Err(ProxyError::Cancelled) => break,
                        Err(e) => conn.write_err(&e).await?,
                    }
                }
                Command::StmtClose(id) => {
                    // No response packet for COM_STMT_CLOSE.
                    registry.close(id);
                }
                Command::StmtReset(_) => {
                    conn.write_ok_packet(0, 0, session.status_flags(), 0).await?;
                }
                Command::Unknown(code) => {
                    conn.write_err_packet(1047, "08S01", &format!("Unknown command 0x{code:02X}"))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn execute_stmt(
        &self,
        payload: &[u8],
        registry: &StmtRegistry,
        executor: &Executor,
        session: &mut Session,
        cancel: &CancelFlag,
    ) -> Result<QueryResult> {
        let stmt_id = PacketReader::new(payload).read_u32()?;
        let stmt = registry.get(stmt_id).ok_or_else(|| {
            ProxyError::ParseContext(format!("unknown prepared statement {stmt_id}"))
        })?;
        let (_, binds) = decode_stmt_execute(payload, stmt.param_count)?;
        executor.execute_prepared(stmt, &binds, session, cancel).await
    }

    async fn write_result<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        conn: &mut Conn<S>,
        session: &Session,
        result: QueryResult,
    ) -> Result<()> {
        match result {
            QueryResult::Ok {
                affected_rows,
                last_insert_id,
            } => {
                conn.write_ok_packet(
                    affected_rows,
                    last_insert_id,
                    session.status_flags(),
                    session.warnings.len() as u16,
                )
                .await
            }
            QueryResult::ResultSet(rs) => conn.write_result_set(&rs, session.status_flags()).await,
        }
    }

    /// Handshake and auth negotiation. The server leads with
    /// `caching_sha2_password`; a client proposing another plugin gets an
    /// auth-switch request and answers with a fresh scramble.
    async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        conn: &mut Conn<S>,
        connection_id: u32,
    ) -> Result<HandshakeResponse> {
        let handshake = InitialHandshake::new(connection_id, &self.config.server_version);
        let salt = handshake.salt;
        let payload = handshake.to_payload()?;
        conn.write_packet(&payload).await?;
        conn.flush().await?;

        let response_payload = conn.read_packet().await?;
        let response = HandshakeResponse::parse(&response_payload)?;
        conn.capabilities = response.capability_flags;

        let mut plugin = response
            .auth_plugin_name
            .clone()
            .unwrap_or_else(|| AUTH_NATIVE_PASSWORD.to_string());
        let mut auth_response = response.auth_response.clone();
        if plugin != AUTH_CACHING_SHA2_PASSWORD {
            conn.write_auth_switch_request(AUTH_CACHING_SHA2_PASSWORD, &salt)
                .await?;
            auth_response = conn.read_packet().await?;
            plugin = AUTH_CACHING_SHA2_PASSWORD.to_string();
        }

        if let Some(expected_user) = &self.config.user {
            if expected_user != &response.username {
                return Err(ProxyError::Auth(response.username.clone()));
            }
        }
        let password = self.config.password.clone().unwrap_or_default();
        let verified = if password.is_empty() {
            auth_response.is_empty()
        } else if plugin == AUTH_CACHING_SHA2_PASSWORD {
            verify_caching_sha2(&password, &auth_response, &salt)
        } else {
            verify_native_password(&password, &auth_response, &salt)
        };
        if !verified {
            return Err(ProxyError::Auth(response.username.clone()));
        }

        // Fast-auth path: the scramble checked out against the stored
        // credential.
        conn.write_auth_more_data(CACHE_SHA2_FAST_AUTH_SUCCEEDED)
            .await?;
        conn.write_ok_packet(0, 0, SERVER_STATUS_AUTOCOMMIT, 0).await?;
        Ok(response)
    }
}
