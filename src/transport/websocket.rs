//! WebSocket transport
//!
//! Translates protocol JSON into broker operations:
//! - `publish` stores a message and answers `published` or `error`
//! - `subscribe` starts a frame task for the topic that pushes one binary
//!   JPEG message per feed item until the client goes away
//!
//! Every connection owns its frame tasks. When the client disconnects they
//! are aborted, which drops their feeds and closes the subscriber sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::broker::Broker;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{Error, Result};

/// Frames and replies queued per connection before the frame tasks wait on
/// a slow client.
const OUTBOUND_QUEUE: usize = 16;

pub async fn start_websocket_server(addr: &str, broker: Arc<Broker>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    serve(listener, broker).await;
    Ok(())
}

/// Accept connections on `listener` forever.
pub async fn serve(listener: TcpListener, broker: Arc<Broker>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(stream, peer, broker.clone()));
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, broker: Arc<Broker>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, error = %e, "WebSocket handshake error");
            return;
        }
    };
    let client_id = format!("client-{}", Uuid::new_v4());
    info!(client = %client_id, %peer, "client connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<WsMessage>(OUTBOUND_QUEUE);

    let send_loop = {
        let client_id = client_id.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    debug!(client = %client_id, error = %e, "send failed");
                    break;
                }
            }
            debug!(client = %client_id, "send loop closed");
        })
    };

    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let text = match msg {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let request = serde_json::from_str::<ClientMessage>(text.as_str())
            .map_err(Error::from)
            .and_then(|request| request.validate().map(|()| request));

        let reply = match request {
            Ok(ClientMessage::Publish {
                topic,
                author,
                message,
            }) => match broker.publish(&topic, &author, &message).await {
                Ok(_) => Some(ServerMessage::Published { topic }),
                Err(e) => {
                    warn!(client = %client_id, %topic, error = %e, "publish failed");
                    Some(ServerMessage::Error {
                        message: "could not store message".to_string(),
                    })
                }
            },
            Ok(ClientMessage::Subscribe { topic }) => {
                if subscriptions.contains_key(&topic) {
                    debug!(client = %client_id, %topic, "already subscribed");
                } else {
                    let task = spawn_frames(&broker, &topic, tx.clone());
                    subscriptions.insert(topic.clone(), task);
                    info!(client = %client_id, %topic, "subscribed");
                }
                None
            }
            Err(Error::InvalidInput(reason)) => Some(ServerMessage::Error { message: reason }),
            Err(e) => {
                debug!(
                    client = %client_id,
                    error = %e,
                    text = %text.chars().take(100).collect::<String>(),
                    "invalid client message"
                );
                Some(ServerMessage::Error {
                    message: "invalid message".to_string(),
                })
            }
        };

        if let Some(reply) = reply {
            match encode(&reply) {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode reply"),
            }
        }
    }

    for (_, task) in subscriptions.drain() {
        task.abort();
    }
    drop(tx);
    if let Err(e) = send_loop.await {
        debug!(client = %client_id, error = %e, "send loop ended abnormally");
    }
    info!(client = %client_id, "client disconnected");
}

fn spawn_frames(broker: &Broker, topic: &str, tx: mpsc::Sender<WsMessage>) -> JoinHandle<()> {
    let mut frames = broker.frames(topic);
    tokio::spawn(async move {
        loop {
            match frames.next_frame().await {
                Ok(Some(image)) => {
                    if tx.send(WsMessage::Binary(image.into())).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(topic = %frames.topic(), error = %e, "frame stream failed");
                    let reply = ServerMessage::Error {
                        message: "render unavailable".to_string(),
                    };
                    if let Ok(msg) = encode(&reply) {
                        let _ = tx.send(msg).await;
                    }
                    break;
                }
            }
        }
    })
}

fn encode(reply: &ServerMessage) -> Result<WsMessage> {
    Ok(WsMessage::Text(serde_json::to_string(reply)?.into()))
}
