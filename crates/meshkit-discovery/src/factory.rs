use std::sync::Arc;

use meshkit_core::{Endpoint, Result};

/// Teardown handle for the resources behind one endpoint (a connection, a
/// pool slot). Invoked exactly once, when the instance leaves the fleet.
pub type Closer = Box<dyn FnOnce() + Send>;

/// Builds a live [`Endpoint`] for one instance identifier.
///
/// Invoked by the endpoint cache the first time an identifier appears in a
/// successful event. A failure here is diagnostic: the cache logs it and
/// carries on without the instance.
pub type Factory<Req, Res> = Arc<dyn Fn(&str) -> Result<(Endpoint<Req, Res>, Closer)> + Send + Sync>;

/// Wraps a closure as a [`Factory`].
pub fn factory_fn<Req, Res, F>(f: F) -> Factory<Req, Res>
where
    F: Fn(&str) -> Result<(Endpoint<Req, Res>, Closer)> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A [`Factory`] for endpoints with no teardown: the closer is a no-op.
pub fn simple_factory<Req, Res, F>(f: F) -> Factory<Req, Res>
where
    F: Fn(&str) -> Result<Endpoint<Req, Res>> + Send + Sync + 'static,
{
    Arc::new(move |instance| Ok((f(instance)?, Box::new(|| {}) as Closer)))
}
