use std::collections::HashMap;

use crate::context::Context;
use crate::endpoint::{BoxFuture, Endpoint};
use crate::error::{EndpointError, Result};

/// An immutable set of named endpoints.
///
/// Built once through [`Service::builder`]; lookup by method name at call
/// time. Unknown names yield [`EndpointError::MethodNotFound`]. Middlewares
/// applied per method before registration; the service itself adds nothing
/// to the call path.
///
/// # Example
///
/// ```
/// use meshkit_core::{Context, Endpoint, Service};
///
/// # async fn demo() {
/// let service: Service<u64, u64> = Service::builder()
///     .method("double", Endpoint::new(|_ctx, req: u64| async move { Ok(req * 2) }))
///     .build();
///
/// let res = service.call(Context::background(), "double", 21).await.unwrap();
/// assert_eq!(res, 42);
/// # }
/// ```
pub struct Service<Req, Res> {
    methods: HashMap<String, Endpoint<Req, Res>>,
}

impl<Req, Res> Service<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn builder() -> ServiceBuilder<Req, Res> {
        ServiceBuilder {
            methods: HashMap::new(),
        }
    }

    /// The endpoint registered under `method`.
    pub fn endpoint(&self, method: &str) -> Result<Endpoint<Req, Res>> {
        self.methods
            .get(method)
            .cloned()
            .ok_or_else(|| EndpointError::MethodNotFound(method.to_string()))
    }

    /// Looks up `method` and invokes it.
    pub fn call(&self, ctx: Context, method: &str, req: Req) -> BoxFuture<Result<Res>> {
        match self.endpoint(method) {
            Ok(endpoint) => endpoint.call(ctx, req),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }
}

pub struct ServiceBuilder<Req, Res> {
    methods: HashMap<String, Endpoint<Req, Res>>,
}

impl<Req, Res> ServiceBuilder<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Registers `endpoint` under `name`. Registering the same name twice
    /// keeps the later endpoint.
    pub fn method(mut self, name: impl Into<String>, endpoint: Endpoint<Req, Res>) -> Self {
        self.methods.insert(name.into(), endpoint);
        self
    }

    pub fn build(self) -> Service<Req, Res> {
        Service {
            methods: self.methods,
        }
    }
}
