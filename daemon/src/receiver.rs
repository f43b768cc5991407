//! Local receiver (§4.4): a stream-socket server for newline-delimited
//! JSON, plus an optional auxiliary datagram receiver admitting into the
//! same queue (§9 open question 2).

use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixDatagram, UnixListener};
use tokio::sync::mpsc;

use crate::actor::Command;

/// Accept connections on `socket_path` forever, parsing newline-delimited
/// JSON per connection and forwarding each record to the actor. Tolerates
/// both long-lived and single-shot connections.
pub async fn run_stream_receiver(socket_path: &str, commands: mpsc::Sender<Command>) {
    let path = Path::new(socket_path);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::remove_file(path);

    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(path = socket_path, error = %e, "failed to bind local receiver socket");
            return;
        }
    };
    set_world_writable(path);

    loop {
        let (stream, _addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept local receiver connection");
                continue;
            }
        };
        let commands = commands.clone();
        tokio::spawn(async move {
            handle_stream(stream, commands).await;
        });
    }
}

async fn handle_stream(stream: tokio::net::UnixStream, commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => admit_line(&line, &commands).await,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading from local receiver connection");
                break;
            }
        }
    }
}

async fn admit_line(line: &str, commands: &mpsc::Sender<Command>) {
    if line.trim().is_empty() {
        return;
    }
    match serde_json::from_str(line) {
        Ok(value) => {
            let _ = commands.send(Command::Admit(value)).await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed line from local receiver");
        }
    }
}

/// Auxiliary datagram receiver, admitting single-shot senders into the
/// same queue as the stream receiver (§9 open question 2).
pub async fn run_datagram_receiver(socket_path: &str, commands: mpsc::Sender<Command>) {
    let path = Path::new(socket_path);
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::remove_file(path);

    let socket = match UnixDatagram::bind(path) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!(path = socket_path, error = %e, "failed to bind datagram receiver");
            return;
        }
    };
    set_world_writable(path);

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match socket.recv(&mut buf).await {
            Ok(n) => {
                if let Ok(line) = std::str::from_utf8(&buf[..n]) {
                    admit_line(line, &commands).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "error reading from datagram receiver");
            }
        }
    }
}

fn set_world_writable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o722);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_line_is_dropped_not_fatal() {
        let (tx, mut rx) = mpsc::channel(4);
        admit_line("not json", &tx).await;
        admit_line("{\"ok\":true}", &tx).await;
        drop(tx);
        let first = rx.recv().await;
        assert!(first.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn blank_line_is_ignored() {
        let (tx, mut rx) = mpsc::channel(4);
        admit_line("", &tx).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
