//! The `serve` mode: a TCP accept loop answering ping and echo requests.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use requestify::{handler_fn, Correlator, CorrelatorConfig, RequestHandler};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn, Instrument};
use transport::StreamTransport;

/// Answers `{"op":"ping"}` with `{"op":"pong"}` and echoes anything else.
pub fn respond(message: Value) -> Result<Value, Value> {
    if message.get("op").and_then(Value::as_str) == Some("ping") {
        return Ok(json!({ "op": "pong" }));
    }
    Ok(json!({ "echo": message }))
}

fn handler() -> impl RequestHandler {
    handler_fn(|message: Value| async move { respond(message) })
}

/// Accepts connections until interrupted.
pub async fn serve(addr: SocketAddr, config: CorrelatorConfig) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "Listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(error = %err, "Accept failed");
                        continue;
                    }
                };
                let span = tracing::info_span!("connection", %peer);
                tokio::spawn(handle_connection(socket, config).instrument(span));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, config: CorrelatorConfig) {
    if let Err(err) = socket.set_nodelay(true) {
        warn!(error = %err, "Failed to set TCP_NODELAY");
    }
    let transport = Arc::new(StreamTransport::new(socket));
    let correlator = match Correlator::new(Arc::clone(&transport), handler(), config) {
        Ok(correlator) => correlator,
        Err(err) => {
            warn!(error = %err, "Failed to wrap connection");
            return;
        }
    };
    info!("Connection opened");

    transport.closed().await;
    correlator.close();
    info!(stats = ?correlator.stats(), "Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ping_answers_pong() {
        assert_eq!(respond(json!({"op": "ping"})), Ok(json!({"op": "pong"})));
    }

    #[test]
    fn test_other_payloads_are_echoed() {
        assert_eq!(respond(json!({"op": "other"})), Ok(json!({"echo": {"op": "other"}})));
        assert_eq!(respond(json!([1, 2])), Ok(json!({"echo": [1, 2]})));
        assert_eq!(respond(Value::Null), Ok(json!({"echo": null})));
    }

    #[tokio::test]
    async fn test_connection_answers_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(socket, CorrelatorConfig::default()).await;
        });

        let transport = Arc::new(StreamTransport::connect(addr).await.unwrap());
        let client = Correlator::new(
            Arc::clone(&transport),
            requestify::NoRequestHandler,
            CorrelatorConfig::default(),
        )
        .unwrap();
        assert_eq!(client.request(json!({"op": "ping"})).await.unwrap(), json!({"op": "pong"}));
        assert_eq!(client.request(json!(7)).await.unwrap(), json!({"echo": 7}));

        // Hanging up ends the server-side connection task.
        transport.shutdown().await.unwrap();
        drop(client);
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap();
    }
}
