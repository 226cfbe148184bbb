//! Newline-delimited JSON tool loop over any byte stream.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use parley_mcp::{McpHandler, ToolRequest, ToolResponse};

/// Serve one connection until EOF or cancellation. Requests run
/// concurrently; responses are written as they complete, so callers match
/// them by `id`.
pub async fn serve_lines<R, W>(
    reader: R,
    mut writer: W,
    handler: Arc<McpHandler>,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<ToolResponse>();

    let write_task = tokio::spawn(async move {
        while let Some(response) = rx.recv().await {
            let payload = match serde_json::to_string(&response) {
                Ok(p) => p,
                Err(err) => {
                    error!("Failed to serialize response: {}", err);
                    continue;
                }
            };
            if let Err(err) = writer.write_all(payload.as_bytes()).await {
                error!("Failed to write response: {}", err);
                break;
            }
            if let Err(err) = writer.write_all(b"\n").await {
                error!("Failed to write newline: {}", err);
                break;
            }
            if let Err(err) = writer.flush().await {
                error!("Failed to flush response: {}", err);
                break;
            }
        }
    });

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read request line")?,
        };
        let Some(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<ToolRequest>(trimmed) {
            Ok(request) => {
                let handler = handler.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handler.handle(request).await;
                    let _ = tx.send(response);
                });
            }
            Err(err) => {
                debug!("Unparseable request line: {}", err);
                let _ = tx.send(ToolResponse::malformed(format!("invalid request: {}", err)));
            }
        }
    }

    // In-flight handlers hold their own senders; the writer drains them.
    drop(tx);
    let _ = write_task.await;
    Ok(())
}

/// Serve on stdin/stdout.
pub async fn serve_stdio(handler: Arc<McpHandler>, cancel: CancellationToken) -> Result<()> {
    info!("Serving tools on stdio");
    serve_lines(tokio::io::stdin(), tokio::io::stdout(), handler, cancel).await
}

/// Accept connections on a Unix socket, one task per connection.
pub async fn serve_socket(path: &Path, handler: Arc<McpHandler>, cancel: CancellationToken) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
    }
    let listener = UnixListener::bind(path)
        .with_context(|| format!("Failed to bind socket: {}", path.display()))?;
    info!("Serving tools on {}", path.display());

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _)) => {
                let handler = handler.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let (reader, writer) = stream.into_split();
                    if let Err(err) = serve_lines(reader, writer, handler, cancel).await {
                        error!("Client error: {:#}", err);
                    }
                });
            }
            Err(err) => error!("Accept error: {}", err),
        }
    }

    let _ = std::fs::remove_file(path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_auth_bridge::testing::ScriptedApi;
    use parley_auth_bridge::WorkspaceApi;
    use parley_core::{QueryEngine, QuerySettings};
    use parley_directory::{MetadataCache, SnapshotPaths};
    use serde_json::Value;
    use tokio::io::AsyncReadExt;

    fn handler(dir: &Path) -> Arc<McpHandler> {
        let api: Arc<dyn WorkspaceApi> = Arc::new(ScriptedApi::new());
        let cache = Arc::new(MetadataCache::new(api.clone(), SnapshotPaths::in_dir(dir)));
        let engine = Arc::new(QueryEngine::new(api, cache, QuerySettings::default()));
        Arc::new(McpHandler::new(engine, CancellationToken::new()))
    }

    async fn exchange(input: &str) -> Vec<Value> {
        let dir = tempfile::tempdir().unwrap();
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let serving = tokio::spawn(serve_lines(
            server_read,
            server_write,
            handler(dir.path()),
            CancellationToken::new(),
        ));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();
        serving.await.unwrap().unwrap();

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_responses_per_request_line() {
        let responses = exchange(
            "{\"id\":\"a\",\"tool\":\"ping\"}\n\n{\"id\":\"b\",\"method\":\"directory_status\"}\n",
        )
        .await;
        assert_eq!(responses.len(), 2);
        let mut ids: Vec<&str> = responses.iter().map(|r| r["id"].as_str().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(responses.iter().all(|r| r["ok"] == Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_garbage_line_gets_error_response() {
        let responses = exchange("not json\n").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["ok"], Value::Bool(false));
        assert_eq!(responses[0]["error_kind"], Value::from("invalid_request"));
    }

    #[tokio::test]
    async fn test_cancelled_loop_returns() {
        let dir = tempfile::tempdir().unwrap();
        let (_client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let cancel = CancellationToken::new();
        cancel.cancel();
        serve_lines(server_read, server_write, handler(dir.path()), cancel)
            .await
            .unwrap();
    }
}
