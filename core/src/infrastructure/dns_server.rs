// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Authoritative DNS listener: a UDP socket and a TCP listener sharing
//! one [`Resolver`], run per bound host under a [`DnsListenerManager`].

use crate::domain::dns::Message;
use crate::infrastructure::dns_codec::{self, DnsCodecError, MAX_TCP_MESSAGE_SIZE, MAX_UDP_MESSAGE_SIZE};
use async_trait::async_trait;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

/// Up to this many concurrent TCP connections are served per listener;
/// beyond that, new connections are accepted and immediately closed.
pub const MAX_TCP_CONNECTIONS: usize = 128;
pub const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DnsServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("listener for {0} already running")]
    AlreadyRunning(String),
    #[error("no listener for {0}")]
    NotRunning(String),
}

impl crate::error::HasErrorKind for DnsServerError {
    fn kind(&self) -> crate::error::ErrorKind {
        match self {
            DnsServerError::Io(_) => crate::error::ErrorKind::Internal,
            DnsServerError::AlreadyRunning(_) => crate::error::ErrorKind::Exists,
            DnsServerError::NotRunning(_) => crate::error::ErrorKind::NotFound,
        }
    }
}

/// Answers a single [`Message`]. Implemented by the network-aware
/// application-layer service that knows container name -> address
/// mappings; this module only owns the wire listeners.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: Message) -> Message;
}

struct Listener {
    cancel: CancellationToken,
}

/// Owns zero or more running (UDP, TCP) listener pairs keyed by bind
/// host, so a network's DNS server can be started/stopped independently
/// of others sharing the same process.
#[derive(Clone)]
pub struct DnsListenerManager {
    listeners: Arc<DashMap<String, Listener>>,
}

impl Default for DnsListenerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsListenerManager {
    pub fn new() -> Self {
        Self { listeners: Arc::new(DashMap::new()) }
    }

    pub async fn start(
        &self,
        bind_addr: SocketAddr,
        resolver: Arc<dyn Resolver>,
    ) -> Result<(), DnsServerError> {
        let key = bind_addr.to_string();
        if self.listeners.contains_key(&key) {
            return Err(DnsServerError::AlreadyRunning(key));
        }

        let cancel = CancellationToken::new();
        let udp = UdpSocket::bind(bind_addr).await?;
        let tcp = TcpListener::bind(bind_addr).await?;

        tokio::spawn(run_udp(udp, resolver.clone(), cancel.clone()));
        tokio::spawn(run_tcp(tcp, resolver, cancel.clone()));

        self.listeners.insert(key, Listener { cancel });
        Ok(())
    }

    pub fn stop(&self, bind_addr: SocketAddr) -> Result<(), DnsServerError> {
        let key = bind_addr.to_string();
        match self.listeners.remove(&key) {
            Some((_, listener)) => {
                listener.cancel.cancel();
                Ok(())
            }
            None => Err(DnsServerError::NotRunning(key)),
        }
    }

    pub fn is_running(&self, bind_addr: SocketAddr) -> bool {
        self.listeners.contains_key(&bind_addr.to_string())
    }
}

async fn run_udp(socket: UdpSocket, resolver: Arc<dyn Resolver>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_UDP_MESSAGE_SIZE];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            recv = socket.recv_from(&mut buf) => {
                let (n, peer) = match recv {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "dns udp recv failed");
                        continue;
                    }
                };
                match handle_datagram(&buf[..n], &resolver).await {
                    Ok(response) => {
                        if let Err(e) = socket.send_to(&response, peer).await {
                            tracing::warn!(error = %e, %peer, "dns udp send failed");
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, %peer, "dropping malformed dns query"),
                }
            }
        }
    }
}

async fn handle_datagram(bytes: &[u8], resolver: &Arc<dyn Resolver>) -> Result<Vec<u8>, DnsCodecError> {
    let query = dns_codec::decode(bytes)?;
    metrics::counter!("podhost_dns_queries_total", "transport" => "udp").increment(1);
    let response = resolver.resolve(query).await;
    let mut encoded = dns_codec::encode(&response)?;
    if encoded.len() > MAX_UDP_MESSAGE_SIZE {
        let mut truncated = response.reply(response.rcode, Vec::new());
        truncated.tc = true;
        encoded = dns_codec::encode(&truncated)?;
    }
    Ok(encoded)
}

async fn run_tcp(listener: TcpListener, resolver: Arc<dyn Resolver>, cancel: CancellationToken) {
    let active = Arc::new(tokio::sync::Semaphore::new(MAX_TCP_CONNECTIONS));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "dns tcp accept failed");
                        continue;
                    }
                };

                let Ok(permit) = active.clone().try_acquire_owned() else {
                    tracing::debug!(%peer, "dns tcp connection limit reached, closing");
                    drop(stream);
                    continue;
                };

                let resolver = resolver.clone();
                let conn_cancel = cancel.child_token();
                metrics::gauge!("podhost_dns_tcp_connections").increment(1.0);
                tokio::spawn(async move {
                    let _permit = permit;
                    serve_tcp_connection(stream, resolver, conn_cancel).await;
                    metrics::gauge!("podhost_dns_tcp_connections").decrement(1.0);
                });
            }
        }
    }
}

async fn serve_tcp_connection(
    mut stream: tokio::net::TcpStream,
    resolver: Arc<dyn Resolver>,
    cancel: CancellationToken,
) {
    loop {
        let mut len_buf = [0u8; 2];
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(TCP_IDLE_TIMEOUT) => return,
            r = stream.read_exact(&mut len_buf) => r,
        };
        if read.is_err() {
            return;
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 || len > MAX_TCP_MESSAGE_SIZE {
            return;
        }

        let mut msg_buf = vec![0u8; len];
        if stream.read_exact(&mut msg_buf).await.is_err() {
            return;
        }

        let response = match dns_codec::decode(&msg_buf) {
            Ok(query) => {
                metrics::counter!("podhost_dns_queries_total", "transport" => "tcp").increment(1);
                resolver.resolve(query).await
            }
            Err(_) => return,
        };
        let encoded = match dns_codec::encode(&response) {
            Ok(b) => b,
            Err(_) => return,
        };
        if encoded.len() > MAX_TCP_MESSAGE_SIZE {
            return;
        }

        let len_prefix = (encoded.len() as u16).to_be_bytes();
        if stream.write_all(&len_prefix).await.is_err() {
            return;
        }
        if stream.write_all(&encoded).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dns::{Question, RCode, RrClass, RrType};

    struct EchoResolver;

    #[async_trait]
    impl Resolver for EchoResolver {
        async fn resolve(&self, query: Message) -> Message {
            query.reply(RCode::NonExistentDomain, Vec::new())
        }
    }

    #[tokio::test]
    async fn udp_round_trip_answers_query() {
        let manager = DnsListenerManager::new();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        // bind via a throwaway socket first to discover a free port,
        // since DnsListenerManager binds both udp and tcp to the exact
        // address given
        let probe = UdpSocket::bind(addr).await.unwrap();
        let bound: SocketAddr = probe.local_addr().unwrap();
        drop(probe);

        manager.start(bound, Arc::new(EchoResolver)).await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let query = Message::query(
            99,
            Question { name: "missing.local".into(), qtype: RrType::A, qclass: RrClass::In },
        );
        let bytes = dns_codec::encode(&query).unwrap();
        client.send_to(&bytes, bound).await.unwrap();

        let mut buf = vec![0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("response within timeout")
            .unwrap();
        let response = dns_codec::decode(&buf[..n]).unwrap();
        assert_eq!(response.id, 99);
        assert_eq!(response.rcode, RCode::NonExistentDomain);

        manager.stop(bound).unwrap();
    }
}
