use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::{LengthPrefixJson, WireCodec};
use crate::error::CallError;
use crate::pending::{CallOutcome, CorrelationTable, PendingCall};
use crate::service::{MethodCompletion, ServiceRegistry};
use crate::transport::Transport;
use crate::wire::{MessageKind, WireEnvelope, WireError, WireErrorCode};

/// Names one remote method: which service, and which method on it.
///
/// The expected response shape is the `Resp` type parameter of
/// [`RpcChannel::call_method`] rather than part of the descriptor.
#[derive(Clone, Copy, Debug)]
pub struct MethodDescriptor<'a> {
    pub service: &'a str,
    pub method: &'a str,
}

/// Bidirectional RPC endpoint multiplexed over one byte-stream connection.
///
/// Outbound calls may be issued from any thread; each is tagged with a fresh
/// correlation id and completed exactly once when the matching response (or
/// error, or teardown) arrives on the receive path. Inbound requests are
/// routed to the registered services and answered on the same connection.
///
/// Cloning produces another handle to the same channel; the receive pump and
/// caller threads each hold one.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Mutex<Option<Arc<dyn Transport>>>,
    codec: Mutex<Box<dyn WireCodec>>,
    next_id: AtomicU64,
    pending: CorrelationTable,
    services: Mutex<Option<Arc<ServiceRegistry>>>,
}

impl RpcChannel {
    /// Creates a channel not yet bound to a connection.
    ///
    /// Calls fail with [`CallError::NotConnected`] until a transport is
    /// bound via [`bind_transport`](RpcChannel::bind_transport).
    pub fn new() -> RpcChannel {
        RpcChannel::with_codec(Box::new(LengthPrefixJson::new()))
    }

    pub fn with_codec(codec: Box<dyn WireCodec>) -> RpcChannel {
        RpcChannel {
            inner: Arc::new(Inner {
                transport: Mutex::new(None),
                codec: Mutex::new(codec),
                next_id: AtomicU64::new(1),
                pending: CorrelationTable::new(),
                services: Mutex::new(None),
            }),
        }
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> RpcChannel {
        let channel = RpcChannel::new();
        channel.bind_transport(transport);
        channel
    }

    /// Binds the channel to its connection.
    ///
    /// A channel is bound at most once for its lifetime; binding over a
    /// live transport is a programming error and panics.
    pub fn bind_transport(&self, transport: Arc<dyn Transport>) {
        let mut slot = self.inner.transport.lock().expect("transport mutex poisoned");
        assert!(slot.is_none(), "channel is already bound to a transport");
        *slot = Some(transport);
    }

    /// Installs the (externally owned) registry consulted for inbound
    /// requests. Without one, every inbound request is answered `NoService`.
    pub fn set_services(&self, services: Arc<ServiceRegistry>) {
        let mut slot = self.inner.services.lock().expect("services mutex poisoned");
        *slot = Some(services);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.live_transport().is_some()
    }

    /// Calls `method` on the remote peer.
    ///
    /// `done` is invoked exactly once, on the receive path, with the
    /// response deserialized into `Resp` or with the failure that resolved
    /// the call. Pre-registration failures (no live transport, a request
    /// that cannot be serialized or framed) are returned synchronously
    /// instead and `done` is never invoked.
    pub fn call_method<Req, Resp, F>(
        &self,
        method: MethodDescriptor<'_>,
        request: &Req,
        done: F,
    ) -> Result<(), CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned + 'static,
        F: FnOnce(Result<Resp, CallError>) + Send + 'static,
    {
        let transport = self.inner.live_transport().ok_or(CallError::NotConnected)?;
        let payload = serde_json::to_value(request)?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = WireEnvelope::request(id, method.service, method.method, payload);

        // Encode before registering so a framing failure is synchronous and
        // leaves no dangling pending call
        let frame = self.inner.encode(&envelope)?;

        self.inner.pending.insert(
            id,
            PendingCall::new(move |outcome| match outcome {
                CallOutcome::Payload(value) => match serde_json::from_value::<Resp>(value) {
                    Ok(response) => done(Ok(response)),
                    Err(err) => done(Err(CallError::MalformedPayload(err))),
                },
                CallOutcome::Failed(err) => done(Err(err)),
            }),
        );

        // close() may have drained the table between the connectivity check
        // and the insert; re-read the slot so the call cannot outlive
        // teardown. Seeing the transport still bound here means any later
        // close() drains after our insert and will catch this call.
        if self
            .inner
            .transport
            .lock()
            .expect("transport mutex poisoned")
            .is_none()
        {
            return match self.inner.pending.take(id) {
                // The drain missed the call; report the failure
                // synchronously, the completion has not run
                Some(_) => Err(CallError::NotConnected),
                // The drain got there first and already resolved the call
                // with ChannelClosed
                None => Ok(()),
            };
        }

        transport.send(frame);
        Ok(())
    }

    /// Entry point for the connection's receive pump.
    ///
    /// Feeds the raw buffer to the codec and dispatches every completed
    /// envelope. Never blocks on a pending call's completion.
    pub fn on_receive(&self, bytes: &[u8], at: Instant) {
        let envelopes = {
            let mut codec = self.inner.codec.lock().expect("codec mutex poisoned");
            match codec.decode(bytes) {
                Ok(envelopes) => envelopes,
                Err(err) => {
                    // Framing is unrecoverable once the stream desyncs
                    warn!("undecodable input, closing channel: {}", err);
                    drop(codec);
                    self.close();
                    return;
                }
            }
        };

        debug!(received_at = ?at, count = envelopes.len(), "dispatching envelopes");
        for envelope in envelopes {
            self.dispatch(envelope);
        }
    }

    fn dispatch(&self, envelope: WireEnvelope) {
        match envelope.kind {
            MessageKind::Request => self.dispatch_request(envelope),
            MessageKind::Response | MessageKind::Error => self.complete_call(envelope),
        }
    }

    /// Routes an inbound REQUEST to a registered service and arranges for
    /// exactly one RESPONSE or ERROR to go back under the same id
    fn dispatch_request(&self, envelope: WireEnvelope) {
        let id = envelope.id;
        let service_name = envelope.service.unwrap_or_default();
        let method_name = envelope.method.unwrap_or_default();

        let registry = self
            .inner
            .services
            .lock()
            .expect("services mutex poisoned")
            .clone();

        let service = match registry.as_ref().and_then(|r| r.lookup(&service_name)) {
            Some(service) => service,
            None => {
                warn!(id, service = %service_name, "request for unknown service");
                self.send_reply(WireEnvelope::error(
                    id,
                    WireErrorCode::NoService,
                    format!("no service named {:?}", service_name),
                ));
                return;
            }
        };

        let handler = match service.method(&method_name) {
            Some(handler) => handler,
            None => {
                warn!(id, service = %service_name, method = %method_name, "request for unknown method");
                self.send_reply(WireEnvelope::error(
                    id,
                    WireErrorCode::NoMethod,
                    format!("service {:?} has no method {:?}", service_name, method_name),
                ));
                return;
            }
        };

        let reply = self.clone();
        let done: MethodCompletion = Box::new(move |result| match result {
            Ok(payload) => reply.send_reply(WireEnvelope::response(id, payload)),
            Err(WireError { code, message }) => {
                reply.send_reply(WireEnvelope::error(id, code, message))
            }
        });

        // The handler may call `done` before returning or hand it off and
        // complete later; either way we are done with this envelope
        handler.invoke(envelope.payload.unwrap_or(Value::Null), done);
    }

    /// Resolves the pending call matching an inbound RESPONSE or ERROR
    fn complete_call(&self, envelope: WireEnvelope) {
        let call = match self.inner.pending.take(envelope.id) {
            Some(call) => call,
            None => {
                // Stale or duplicate delivery; diagnostic only
                debug!(id = envelope.id, "response without a pending call, discarding");
                return;
            }
        };

        let outcome = match envelope.kind {
            MessageKind::Error => {
                let WireError { code, message } = envelope.error.unwrap_or(WireError {
                    code: WireErrorCode::InvalidResponse,
                    message: "error envelope without an error descriptor".to_owned(),
                });
                CallOutcome::Failed(CallError::Remote { code, message })
            }
            _ => CallOutcome::Payload(envelope.payload.unwrap_or(Value::Null)),
        };

        // The table lock is already released; a slow callback stalls nothing
        call.resolve(outcome);
    }

    fn send_reply(&self, envelope: WireEnvelope) {
        let transport = match self.inner.live_transport() {
            Some(transport) => transport,
            None => {
                warn!(id = envelope.id, "dropping reply, transport is gone");
                return;
            }
        };

        match self.inner.encode(&envelope) {
            Ok(frame) => transport.send(frame),
            Err(err) => warn!(id = envelope.id, "could not encode reply: {}", err),
        }
    }

    /// Tears the channel down: detaches the transport and fails every
    /// outstanding call with [`CallError::ChannelClosed`] before returning.
    /// Idempotent; later `call_method` attempts fail with `NotConnected`.
    pub fn close(&self) {
        self.inner
            .transport
            .lock()
            .expect("transport mutex poisoned")
            .take();
        self.inner.fail_pending();
    }
}

impl Default for RpcChannel {
    fn default() -> RpcChannel {
        RpcChannel::new()
    }
}

impl Inner {
    fn live_transport(&self) -> Option<Arc<dyn Transport>> {
        let transport = self
            .transport
            .lock()
            .expect("transport mutex poisoned")
            .clone()?;

        if transport.is_connected() {
            Some(transport)
        } else {
            None
        }
    }

    fn encode(&self, envelope: &WireEnvelope) -> Result<Vec<u8>, crate::error::CodecError> {
        self.codec
            .lock()
            .expect("codec mutex poisoned")
            .encode(envelope)
    }

    fn fail_pending(&self) {
        let drained = self.pending.drain();
        if !drained.is_empty() {
            debug!(count = drained.len(), "failing calls still pending at teardown");
        }

        for (_, call) in drained {
            call.resolve(CallOutcome::Failed(CallError::ChannelClosed));
        }
    }
}

impl Drop for Inner {
    // A channel dropped with calls still in flight must fail them, not leak them
    fn drop(&mut self) {
        self.fail_pending();
    }
}
