//! Unix-socket IPC: newline-delimited JSON, bidirectional, many requests
//! in flight per connection, correlated by a client-generated requestId.

use crate::lifecycle::Daemon;
use anyhow::{Context, Result};
use reveries_mind::MonologueEvent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};

/// Requests and responses are rejected above this size.
const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Chat {
        message: String,
        conversation_id: String,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    Status {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    Consolidate {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    MonologueStream {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    MemoryStats {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    MemorySearch {
        query: String,
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
    Shutdown {
        #[serde(rename = "requestId", default)]
        request_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub raw_buffer_count: i64,
    pub episode_count: usize,
    pub link_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    ChatChunk {
        content: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    ChatDone {
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Status {
        uptime_ms: u64,
        monologue_state: String,
        memory_stats: MemoryStats,
        last_consolidation: Option<i64>,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    MonologueChunk {
        content: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    ProactiveMessage {
        content: String,
    },
    Error {
        message: String,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

// ============================================================================
// Server
// ============================================================================

pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind the socket, replacing any stale file from a previous run.
    pub fn bind<P: AsRef<Path>>(path: P) -> Result<Self> {
        let socket_path = path.as_ref().to_path_buf();
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)
                .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
        }
        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind socket {}", socket_path.display()))?;
        tracing::info!("IPC listening on {}", socket_path.display());
        Ok(Self {
            listener,
            socket_path,
        })
    }

    /// Accept connections until shutdown is signalled.
    pub async fn serve(
        self,
        daemon: Arc<Daemon>,
        mut shutdown: watch::Receiver<bool>,
        shutdown_tx: watch::Sender<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            let daemon = daemon.clone();
                            let shutdown_tx = shutdown_tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, daemon, shutdown_tx).await {
                                    tracing::debug!("Connection ended with error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!("IPC server stopped");
    }
}

async fn handle_connection(
    stream: UnixStream,
    daemon: Arc<Daemon>,
    shutdown_tx: watch::Sender<bool>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Single writer task; every in-flight request funnels responses here.
    let (out_tx, mut out_rx) = mpsc::channel::<Response>(256);
    let writer = tokio::spawn(async move {
        while let Some(response) = out_rx.recv().await {
            let mut line = match serde_json::to_string(&response) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!("Failed to serialise response: {}", e);
                    continue;
                }
            };
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    // Unsolicited proactive messages go to every connection.
    {
        let mut events = daemon.monologue().subscribe();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let MonologueEvent::ReachOut(content) = event {
                    if out_tx
                        .send(Response::ProactiveMessage { content })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });
    }

    loop {
        let line = match read_bounded_line(&mut reader, MAX_MESSAGE_BYTES).await? {
            LineRead::Eof => break,
            LineRead::Oversize => {
                let _ = out_tx
                    .send(Response::Error {
                        message: format!("Message exceeds {} byte limit", MAX_MESSAGE_BYTES),
                        request_id: None,
                    })
                    .await;
                continue;
            }
            LineRead::Line(line) => line,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                let _ = out_tx
                    .send(Response::Error {
                        message: format!("Invalid request: {}", e),
                        request_id: None,
                    })
                    .await;
                continue;
            }
        };

        let daemon = daemon.clone();
        let out_tx = out_tx.clone();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            dispatch(request, daemon, out_tx, shutdown_tx).await;
        });
    }

    // Socket closed: the conversation (if any) is over.
    if let Err(e) = daemon.conversation().end_conversation().await {
        tracing::warn!("Failed to close conversation on disconnect: {}", e);
    }
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

enum LineRead {
    /// A complete line within the size cap (newline stripped).
    Line(String),
    /// The line exceeded the cap; its remainder was drained unbuffered.
    Oversize,
    Eof,
}

/// Read one newline-terminated line without ever buffering more than `max`
/// bytes. The size bound caps per-message memory use, not just what gets
/// accepted: an oversize line is rejected while it streams past, never
/// accumulated.
async fn read_bounded_line<R>(reader: &mut R, max: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    enum Step {
        Eof,
        Line,
        Oversize { newline_seen: bool },
        More,
    }

    let mut buf: Vec<u8> = Vec::new();
    loop {
        let (step, consumed) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                (Step::Eof, 0)
            } else if let Some(pos) = available.iter().position(|&b| b == b'\n') {
                if buf.len() + pos > max {
                    (Step::Oversize { newline_seen: true }, pos + 1)
                } else {
                    buf.extend_from_slice(&available[..pos]);
                    (Step::Line, pos + 1)
                }
            } else if buf.len() + available.len() > max {
                (Step::Oversize { newline_seen: false }, available.len())
            } else {
                buf.extend_from_slice(available);
                (Step::More, available.len())
            }
        };
        reader.consume(consumed);

        match step {
            Step::Eof => {
                return Ok(if buf.is_empty() {
                    LineRead::Eof
                } else {
                    LineRead::Line(String::from_utf8_lossy(&buf).into_owned())
                });
            }
            Step::Line => {
                return Ok(LineRead::Line(String::from_utf8_lossy(&buf).into_owned()));
            }
            Step::Oversize { newline_seen } => {
                if !newline_seen {
                    drain_to_newline(reader).await?;
                }
                return Ok(LineRead::Oversize);
            }
            Step::More => {}
        }
    }
}

/// Discard input up to and including the next newline (or EOF), consuming
/// buffered chunks without accumulating them.
async fn drain_to_newline<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                (0, true)
            } else if let Some(pos) = available.iter().position(|&b| b == b'\n') {
                (pos + 1, true)
            } else {
                (available.len(), false)
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(());
        }
    }
}

async fn dispatch(
    request: Request,
    daemon: Arc<Daemon>,
    out_tx: mpsc::Sender<Response>,
    shutdown_tx: watch::Sender<bool>,
) {
    match request {
        Request::Chat {
            message,
            conversation_id,
            request_id,
        } => {
            let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(64);
            let forward_id = request_id.clone();
            let forward_tx = out_tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(content) = chunk_rx.recv().await {
                    if forward_tx
                        .send(Response::ChatChunk {
                            content,
                            request_id: forward_id.clone(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });

            let result = daemon
                .conversation()
                .handle(&message, &conversation_id, chunk_tx)
                .await;
            let _ = forwarder.await;
            match result {
                Ok(_) => {
                    let _ = out_tx.send(Response::ChatDone { request_id }).await;
                }
                Err(e) => {
                    let _ = out_tx
                        .send(Response::Error {
                            message: e.to_string(),
                            request_id,
                        })
                        .await;
                }
            }
        }
        Request::Status { request_id } => {
            let status = daemon.status().await;
            let _ = out_tx
                .send(Response::Status {
                    uptime_ms: status.uptime_ms,
                    monologue_state: status.monologue_state,
                    memory_stats: status.memory_stats,
                    last_consolidation: status.last_consolidation,
                    request_id,
                })
                .await;
        }
        Request::Consolidate { request_id } => match daemon.consolidate_now().await {
            Ok(outcome) => {
                let _ = out_tx
                    .send(Response::Ok {
                        data: Some(serde_json::json!({
                            "drained": outcome.drained,
                            "inserted": outcome.inserted,
                            "merged": outcome.merged,
                        })),
                        request_id,
                    })
                    .await;
            }
            Err(e) => {
                let _ = out_tx
                    .send(Response::Error {
                        message: e.to_string(),
                        request_id,
                    })
                    .await;
            }
        },
        Request::MonologueStream { request_id } => {
            // Streams until the socket closes; no terminator.
            let mut events = daemon.monologue().subscribe();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(MonologueEvent::Chunk(content)) => {
                            if out_tx
                                .send(Response::MonologueChunk {
                                    content,
                                    request_id: request_id.clone(),
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!("Monologue stream lagged by {} events", n);
                        }
                        Err(_) => break,
                    }
                }
            });
        }
        Request::MemoryStats { request_id } => {
            let status = daemon.status().await;
            let _ = out_tx
                .send(Response::Ok {
                    data: Some(serde_json::to_value(&status.memory_stats).unwrap_or_default()),
                    request_id,
                })
                .await;
        }
        Request::MemorySearch { query, request_id } => match daemon.memory_search(&query).await {
            Ok(results) => {
                let _ = out_tx
                    .send(Response::Ok {
                        data: Some(results),
                        request_id,
                    })
                    .await;
            }
            Err(e) => {
                let _ = out_tx
                    .send(Response::Error {
                        message: e.to_string(),
                        request_id,
                    })
                    .await;
            }
        },
        Request::Shutdown { request_id } => {
            let _ = out_tx
                .send(Response::Ok {
                    data: None,
                    request_id,
                })
                .await;
            let _ = shutdown_tx.send(true);
        }
    }
}
