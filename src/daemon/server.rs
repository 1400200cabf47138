//! Two user-scoped Unix domain sockets: request/response RPC and a
//! server-push event stream (spec §4.9). Grounded on the accept-loop shape
//! in `Alb-O-xeno`'s broker IPC (`UnixListener::bind` → `accept()` loop →
//! one task per connection) and the socket-file lifecycle in
//! `groblegark-oddjobs`'s daemon lifecycle module.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use super::rpc::{RpcRequest, RpcResponse};
use super::Daemon;
use crate::event::Event;

fn bind(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(listener)
}

/// Binds and serves the RPC socket until `cancel` fires.
pub fn spawn_rpc_server(daemon: Arc<Daemon>, path: &Path, cancel: CancellationToken) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = bind(path)?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let daemon = daemon.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_rpc_connection(daemon, stream).await {
                                    log::debug!("rpc connection ended: {err}");
                                }
                            });
                        }
                        Err(err) => {
                            log::warn!("rpc accept failed: {err}");
                            break;
                        }
                    }
                }
            }
        }
    }))
}

async fn handle_rpc_connection(daemon: Arc<Daemon>, stream: UnixStream) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (verb, response) = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                let verb = request.verb.clone();
                (verb, daemon.dispatch(request).await)
            }
            Err(err) => (String::new(), RpcResponse::err(format!("malformed request: {err}"))),
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        write_half.write_all(&encoded).await?;

        if verb == "shutdown" {
            break;
        }
    }
    Ok(())
}

/// Binds and serves the event-stream socket until `cancel` fires. Each
/// accepted connection gets its own subscriber; slow readers lag and skip
/// ahead rather than block the publisher (spec §5 event fan-out policy).
pub fn spawn_event_server(daemon: Arc<Daemon>, path: &Path, cancel: CancellationToken) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let listener = bind(path)?;
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let events = daemon.events.clone();
                            let cancel = cancel.clone();
                            tokio::spawn(async move {
                                if let Err(err) = handle_event_connection(events, stream, cancel).await {
                                    log::debug!("event connection ended: {err}");
                                }
                            });
                        }
                        Err(err) => {
                            log::warn!("event accept failed: {err}");
                            break;
                        }
                    }
                }
            }
        }
    }))
}

async fn handle_event_connection(
    events: Arc<crate::pubsub::PubSub<Event>>,
    stream: UnixStream,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut subscriber = events.subscribe();
    let (_read_half, mut write_half) = stream.into_split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscriber.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(_) => break,
                };
                let mut encoded = serde_json::to_vec(&event)?;
                encoded.push(b'\n');
                if write_half.write_all(&encoded).await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;

    #[tokio::test]
    async fn rpc_round_trip_over_socket_pair() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.audit_enabled = false;
        let daemon = Daemon::new(config).await.unwrap();

        let (client, server) = UnixStream::pair().unwrap();
        tokio::spawn(handle_rpc_connection(daemon, server));

        let (read_half, mut write_half) = client.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half.write_all(b"{\"verb\":\"status\"}\n").await.unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: RpcResponse = serde_json::from_str(&line).unwrap();
        assert!(response.ok);
    }
}
