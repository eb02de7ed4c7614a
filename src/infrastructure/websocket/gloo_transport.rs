//! Browser WebSocket transport on top of `gloo-net`.

use super::dto::{decode_event, encode_auth, encode_command};
use crate::domain::errors::{AppError, NetworkResult};
use crate::domain::logging::{LogComponent, get_logger};
use crate::domain::stream::{
    ClientCommand, ConnectRequest, Connector, TransportEvent, TransportHandle, TransportSink,
};
use crate::{log_debug, log_warn};
use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::{AbortHandle, Abortable};
use futures::{SinkExt, StreamExt};
use gloo_net::websocket::futures::WebSocket;
use gloo_net::websocket::{Message, WebSocketError};

const COMPONENT: LogComponent = LogComponent::Infrastructure("GatewaySocket");

#[derive(Debug, Clone, Copy, Default)]
pub struct GlooConnector;

impl GlooConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for GlooConnector {
    fn open(
        &self,
        request: &ConnectRequest,
        sink: TransportSink,
    ) -> NetworkResult<Box<dyn TransportHandle>> {
        // the url already carries the namespace path
        let url = &request.url;
        get_logger().info(COMPONENT, &format!("🔌 Opening {url}"));
        let socket = WebSocket::open(url)
            .map_err(|e| AppError::NetworkError(format!("Failed to open WebSocket: {e}")))?;
        let (mut write, mut read) = socket.split();

        let (tx, mut rx) = mpsc::unbounded::<String>();
        let auth = encode_auth(&request.auth)?;

        let writer_sink = sink.clone();
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(e) = write.send(Message::Text(auth)).await {
                writer_sink.emit(TransportEvent::Error(format!("handshake failed: {e}")));
                return;
            }
            writer_sink.emit(TransportEvent::Opened);
            while let Some(frame) = rx.next().await {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    writer_sink.emit(TransportEvent::Error(format!("send failed: {e}")));
                    return;
                }
            }
            // channel closed by the handle
            let _ = write.close().await;
        });

        let (abort, registration) = AbortHandle::new_pair();
        let reader = async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match decode_event(&text) {
                        Ok(Some(event)) => sink.emit(TransportEvent::Message(event)),
                        Ok(None) => {}
                        Err(e) => {
                            log_warn!(COMPONENT, "⚠️ Dropping malformed frame: {}", e);
                        }
                    },
                    Ok(Message::Bytes(bytes)) => {
                        log_debug!(COMPONENT, "ignoring {} byte binary frame", bytes.len());
                    }
                    Err(WebSocketError::ConnectionClose(close)) => {
                        sink.emit(TransportEvent::Closed {
                            reason: format!("closed with code {} {}", close.code, close.reason),
                        });
                        return;
                    }
                    Err(e) => {
                        sink.emit(TransportEvent::Error(e.to_string()));
                        return;
                    }
                }
            }
            sink.emit(TransportEvent::Closed { reason: "stream ended".into() });
        };
        wasm_bindgen_futures::spawn_local(async move {
            let _ = Abortable::new(reader, registration).await;
        });

        Ok(Box::new(GlooTransport { tx, reader: abort }))
    }
}

/// Outgoing frames go through a channel drained by the writer task; closing
/// the channel makes the writer close the socket.
struct GlooTransport {
    tx: UnboundedSender<String>,
    reader: AbortHandle,
}

impl TransportHandle for GlooTransport {
    fn send(&mut self, command: &ClientCommand) -> NetworkResult<()> {
        let frame = encode_command(command)?;
        self.tx
            .unbounded_send(frame)
            .map_err(|_| AppError::NetworkError("socket writer has stopped".into()))
    }

    fn close(&mut self) {
        self.tx.close_channel();
        self.reader.abort();
    }
}

impl Drop for GlooTransport {
    fn drop(&mut self) {
        self.close();
    }
}
