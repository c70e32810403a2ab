// src/web/server.rs - Listening endpoint and accept loop
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use super::backoff::Backoff;
use super::session::Session;
use super::slot::SessionSlot;
use crate::config::ServerConfig;
use crate::router::Router;

const LISTEN_BACKLOG: u32 = 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts orchestrator connections one after another. Each accepted
/// connection becomes the active session and supersedes the previous one.
pub struct ControlServer {
    listener: TcpListener,
    router: Arc<Router>,
    sessions: SessionSlot,
    reconnect_unit: Duration,
    allow_remote_control: bool,
}

impl ControlServer {
    /// Bind with address reuse so a restart can take the port back at once.
    pub async fn bind(config: &ServerConfig, router: Arc<Router>, sessions: SessionSlot) -> Result<Self, ServerError> {
        let ip: IpAddr = config
            .bind_address
            .parse()
            .map_err(|_| ServerError::InvalidAddress(config.bind_address.clone()))?;
        let addr = SocketAddr::new(ip, config.port);
        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        tracing::info!("Control server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            sessions,
            reconnect_unit: config.reconnect_unit(),
            allow_remote_control: config.allow_remote_control,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept forever. A failed accept waits `unit × backoff` before the
    /// next attempt; a successful one resets the backoff.
    pub async fn run(&self) {
        let mut backoff = Backoff::new();
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    backoff.reset();
                    self.open_session(stream, peer).await;
                }
                Err(e) => {
                    let delay = self.reconnect_unit * backoff.next_delay();
                    tracing::warn!("Accept failed: {}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Serve until `shutdown` resolves, then close the active session.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future,
    {
        tokio::select! {
            _ = self.run() => {}
            _ = shutdown => tracing::info!("Shutting down control server"),
        }
        self.sessions.close_active().await;
    }

    async fn open_session(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle for {}: {}", peer, e);
        }
        let (session, io) = Session::new(peer);
        let authorized = peer.ip().is_loopback() || self.allow_remote_control;
        session.set_authorized(authorized);
        tracing::info!(session = %session.id(), "Accepted {} (authorized: {})", peer, authorized);

        self.sessions.install(session.clone()).await;

        let sessions = self.sessions.clone();
        let router = self.router.clone();
        tokio::spawn(async move {
            let id = session.id();
            session.run(stream, io, router).await;
            sessions.clear_if(id).await;
        });
    }
}
