//! A small HTTP/1.0 server core.
//!
//! Connections are read by hand so that each route decides how much of the
//! request is consumed: headers may be parsed, skipped, or left on the wire
//! for the handler. See [`router`].

use futures::future::BoxFuture;

use crate::error::Error;

/// Incoming requests.
pub mod request;

/// Writing responses.
pub mod response;

/// Route tables, mounts and dispatch.
pub mod router;

/// Matching paths against routes.
pub mod pattern;

/// URL-encoded form bodies.
pub mod form;

/// Handler wrappers for authentication and method checks.
pub mod guard;

pub use request::Request;
pub use response::Response;

/// What happens to the connection once a handler is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The router closes the connection.
    Close,

    /// The handler closed the connection itself, or took the stream over.
    /// The router leaves it alone.
    Done,
}

/// The future a [`Handler`] returns.
pub type HandlerFuture<'a> = BoxFuture<'a, Result<Disposition, Error>>;

/// Serves a matched request.
///
/// The handler is responsible for the status line and body.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call<'a>(&'a self, request: &'a mut Request, response: &'a mut Response)
        -> HandlerFuture<'a>;
}

/// A [`Handler`] made from a closure, see [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Turn a closure into a [`Handler`].
///
/// ```ignore
/// handler_fn(|_request, response| Box::pin(async move {
///     response.text("hello\n").await?;
///     Ok::<_, Error>(Disposition::Close)
/// }))
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Response) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    fn call<'a>(
        &'a self,
        request: &'a mut Request,
        response: &'a mut Response,
    ) -> HandlerFuture<'a> {
        (self.0)(request, response)
    }
}
