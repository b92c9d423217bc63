use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::wire::{WireError, WireErrorCode};

/// Single-shot continuation handed to a method handler.
///
/// Must be called exactly once, either with the serialized response payload
/// or with a wire error to report back to the remote caller. The handler may
/// call it before returning or hand it off and complete later; the channel
/// never waits on it.
pub type MethodCompletion = Box<dyn FnOnce(Result<Value, WireError>) + Send>;

/// A callable method on a locally registered service
pub trait MethodHandler: Send + Sync {
    fn invoke(&self, request: Value, done: MethodCompletion);
}

/// A service capable of looking up its methods by name
pub trait Service: Send + Sync {
    fn method(&self, name: &str) -> Option<&dyn MethodHandler>;
}

/// Read-only lookup from service name to implementation.
///
/// Built and owned outside the channel; the channel holds a shared view and
/// never mutates it.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> ServiceRegistry {
        ServiceRegistry::default()
    }

    pub fn register(&mut self, name: impl Into<String>, service: Arc<dyn Service>) {
        self.services.insert(name.into(), service);
    }

    pub fn lookup(&self, name: &str) -> Option<&Arc<dyn Service>> {
        self.services.get(name)
    }
}

/// Service backed by a plain map from method name to handler
#[derive(Default)]
pub struct MethodMap {
    methods: HashMap<String, Box<dyn MethodHandler>>,
}

impl MethodMap {
    pub fn new() -> MethodMap {
        MethodMap::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, handler: impl MethodHandler + 'static) {
        self.methods.insert(name.into(), Box::new(handler));
    }
}

impl Service for MethodMap {
    fn method(&self, name: &str) -> Option<&dyn MethodHandler> {
        self.methods.get(name).map(|handler| handler.as_ref())
    }
}

/// Typed completion produced by [`method_fn`] handlers
pub type TypedCompletion<Resp> = Box<dyn FnOnce(Resp) + Send>;

/// Adapts a typed closure into a [`MethodHandler`].
///
/// The wrapper deserializes the request payload into `Req` before invoking
/// the closure and reports `InvalidRequest` to the remote caller when that
/// fails; the closure only ever sees well-formed requests.
pub fn method_fn<Req, Resp, F>(f: F) -> MethodFn<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req, TypedCompletion<Resp>) + Send + Sync + 'static,
{
    MethodFn {
        f,
        _shape: PhantomData,
    }
}

pub struct MethodFn<Req, Resp, F> {
    f: F,
    _shape: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, F> MethodHandler for MethodFn<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req, TypedCompletion<Resp>) + Send + Sync + 'static,
{
    fn invoke(&self, request: Value, done: MethodCompletion) {
        let request: Req = match serde_json::from_value(request) {
            Ok(request) => request,
            Err(err) => {
                return done(Err(WireError {
                    code: WireErrorCode::InvalidRequest,
                    message: err.to_string(),
                }));
            }
        };

        let respond: TypedCompletion<Resp> = Box::new(move |response| {
            match serde_json::to_value(response) {
                Ok(payload) => done(Ok(payload)),
                Err(err) => done(Err(WireError {
                    code: WireErrorCode::InvalidResponse,
                    message: err.to_string(),
                })),
            }
        });

        (self.f)(request, respond);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::Mutex;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddRequest {
        a: i64,
        b: i64,
    }

    fn capture() -> (Arc<Mutex<Option<Result<Value, WireError>>>>, MethodCompletion) {
        let slot = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&slot);
        let done: MethodCompletion = Box::new(move |result| {
            *sink.lock().unwrap() = Some(result);
        });
        (slot, done)
    }

    #[test]
    fn typed_handler_deserializes_and_responds() {
        let handler = method_fn(|request: AddRequest, respond: TypedCompletion<i64>| {
            respond(request.a + request.b);
        });

        let (slot, done) = capture();
        handler.invoke(json!({"a": 2, "b": 3}), done);

        let result = slot.lock().unwrap().take().expect("handler completed");
        assert_eq!(result.unwrap(), json!(5));
    }

    #[test]
    fn typed_handler_rejects_malformed_request() {
        let handler = method_fn(|request: AddRequest, respond: TypedCompletion<i64>| {
            respond(request.a + request.b);
        });

        let (slot, done) = capture();
        handler.invoke(json!("not an object"), done);

        let result = slot.lock().unwrap().take().expect("handler completed");
        let error = result.unwrap_err();
        assert_eq!(error.code, WireErrorCode::InvalidRequest);
    }

    #[test]
    fn method_map_looks_up_by_name() {
        let mut service = MethodMap::new();
        service.insert(
            "echo",
            method_fn(|request: Value, respond: TypedCompletion<Value>| respond(request)),
        );

        assert!(service.method("echo").is_some());
        assert!(service.method("missing").is_none());
    }

    #[test]
    fn registry_lookup_is_by_service_name() {
        let mut registry = ServiceRegistry::new();
        registry.register("echo", Arc::new(MethodMap::new()));

        assert!(registry.lookup("echo").is_some());
        assert!(registry.lookup("other").is_none());
    }
}
