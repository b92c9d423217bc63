use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::RpcChannel;
use crate::transport::Transport;

const READ_CHUNK_LEN: usize = 8 * 1024;

/// Transport over a tokio byte stream.
///
/// Frames are queued on an unbounded channel and written out sequentially by
/// a dedicated task, so `send` never blocks a caller thread.
pub struct StreamTransport {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    connected: Arc<AtomicBool>,
}

impl Transport for StreamTransport {
    fn send(&self, frame: Vec<u8>) {
        if self.outgoing.send(frame).is_err() {
            // Write task is gone; the connection is dead
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.outgoing.is_closed()
    }
}

/// Binds `channel` to a reader/writer pair and starts its receive pump.
///
/// Spawns two tasks: one draining outgoing frames onto the writer, and one
/// reading raw buffers and feeding them to the channel. One task owns the
/// receive path for the connection's lifetime. When the read side reaches
/// EOF or fails, the channel is closed, failing every outstanding call.
pub fn bind(
    channel: &RpcChannel,
    reader: impl AsyncRead + Unpin + Send + 'static,
    writer: impl AsyncWrite + Unpin + Send + 'static,
) -> Arc<StreamTransport> {
    let (send_outgoing, mut recv_outgoing) = mpsc::unbounded_channel::<Vec<u8>>();
    let connected = Arc::new(AtomicBool::new(true));

    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(frame) = recv_outgoing.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let pump_channel = channel.clone();
    let pump_connected = Arc::clone(&connected);
    tokio::spawn(async move {
        let mut reader = reader;
        let mut chunk = vec![0u8; READ_CHUNK_LEN];

        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => pump_channel.on_receive(&chunk[..n], Instant::now()),
            }
        }

        pump_connected.store(false, Ordering::SeqCst);
        debug!("stream ended, closing channel");
        pump_channel.close();
    });

    let transport = Arc::new(StreamTransport {
        outgoing: send_outgoing,
        connected,
    });
    channel.bind_transport(transport.clone());
    transport
}

#[cfg(test)]
mod test {
    use super::*;

    use serde_json::json;
    use tokio::io::split;
    use tokio::sync::oneshot;

    use crate::channel::MethodDescriptor;
    use crate::error::CallError;
    use crate::service::{method_fn, MethodMap, TypedCompletion};
    use crate::service::ServiceRegistry;

    fn greeter_registry() -> Arc<ServiceRegistry> {
        let mut service = MethodMap::new();
        service.insert(
            "greet",
            method_fn(|name: String, respond: TypedCompletion<String>| {
                respond(format!("hello, {}", name));
            }),
        );

        let mut registry = ServiceRegistry::new();
        registry.register("greeter", Arc::new(service));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn calls_round_trip_between_two_channels() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let server = RpcChannel::new();
        server.set_services(greeter_registry());
        let (server_read, server_write) = split(server_io);
        bind(&server, server_read, server_write);

        let client = RpcChannel::new();
        let (client_read, client_write) = split(client_io);
        bind(&client, client_read, client_write);

        let (send_result, recv_result) = oneshot::channel();
        client
            .call_method(
                MethodDescriptor {
                    service: "greeter",
                    method: "greet",
                },
                &"world".to_owned(),
                move |result: Result<String, CallError>| {
                    let _ = send_result.send(result);
                },
            )
            .unwrap();

        let greeting = recv_result.await.unwrap().unwrap();
        assert_eq!(greeting, "hello, world");
    }

    #[tokio::test]
    async fn several_in_flight_calls_each_complete() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let server = RpcChannel::new();
        server.set_services(greeter_registry());
        let (server_read, server_write) = split(server_io);
        bind(&server, server_read, server_write);

        let client = RpcChannel::new();
        let (client_read, client_write) = split(client_io);
        bind(&client, client_read, client_write);

        let mut receivers = Vec::new();
        for name in ["ada", "grace", "edsger"] {
            let (send_result, recv_result) = oneshot::channel();
            client
                .call_method(
                    MethodDescriptor {
                        service: "greeter",
                        method: "greet",
                    },
                    &name.to_owned(),
                    move |result: Result<String, CallError>| {
                        let _ = send_result.send(result);
                    },
                )
                .unwrap();
            receivers.push((name, recv_result));
        }

        for (name, recv_result) in receivers {
            let greeting = recv_result.await.unwrap().unwrap();
            assert_eq!(greeting, format!("hello, {}", name));
        }
    }

    #[tokio::test]
    async fn peer_disappearing_fails_the_pending_call() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let client = RpcChannel::new();
        let (client_read, client_write) = split(client_io);
        bind(&client, client_read, client_write);

        // The peer never answers
        let (send_result, recv_result) = oneshot::channel();
        client
            .call_method(
                MethodDescriptor {
                    service: "greeter",
                    method: "greet",
                },
                &json!("nobody"),
                move |result: Result<String, CallError>| {
                    let _ = send_result.send(result);
                },
            )
            .unwrap();

        // Dropping the remote end EOFs the client's read side
        drop(server_io);

        let result = recv_result.await.unwrap();
        assert!(matches!(result, Err(CallError::ChannelClosed)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn unregistered_service_is_reported_remotely() {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let server = RpcChannel::new();
        let (server_read, server_write) = split(server_io);
        bind(&server, server_read, server_write);

        let client = RpcChannel::new();
        let (client_read, client_write) = split(client_io);
        bind(&client, client_read, client_write);

        let (send_result, recv_result) = oneshot::channel();
        client
            .call_method(
                MethodDescriptor {
                    service: "missing",
                    method: "anything",
                },
                &json!({}),
                move |result: Result<serde_json::Value, CallError>| {
                    let _ = send_result.send(result);
                },
            )
            .unwrap();

        let err = recv_result.await.unwrap().unwrap_err();
        match err {
            CallError::Remote { code, .. } => {
                assert_eq!(code, crate::wire::WireErrorCode::NoService);
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }
}
