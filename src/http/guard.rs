//! Handler wrappers.
//!
//! Wrappers are plain handlers holding another handler. The control routes
//! compose them as `protected(token, post(handler))`: the token is checked
//! before the method, and the body is only read once both passed.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use headers::{authorization::Bearer, Authorization, HeaderMapExt};
use tracing::{debug, info};

use crate::{
    error::Error,
    http::{Disposition, Handler, HandlerFuture, Request, Response},
};

/// See [`protected`].
pub struct Protected<H> {
    token: Arc<str>,
    inner: H,
}

/// Refuse with 401 unless the request carries `Authorization: Bearer <token>`.
///
/// The route must parse headers.
pub fn protected<H: Handler>(token: impl Into<Arc<str>>, inner: H) -> Protected<H> {
    Protected {
        token: token.into(),
        inner,
    }
}

impl<H: Handler> Protected<H> {
    fn authorized(&self, request: &Request) -> bool {
        request
            .headers
            .as_ref()
            .and_then(|headers| headers.typed_get::<Authorization<Bearer>>())
            .is_some_and(|authorization| authorization.token() == &*self.token)
    }

    async fn serve(&self, request: &mut Request, response: &mut Response) -> Result<Disposition, Error> {
        if !self.authorized(request) {
            info!(path = %request.path, "Unauthorized");
            return Err(Error::Rejected(StatusCode::UNAUTHORIZED));
        }

        self.inner.call(request, response).await
    }
}

impl<H: Handler> Handler for Protected<H> {
    fn call<'a>(&'a self, request: &'a mut Request, response: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(request, response))
    }
}

/// See [`post`].
pub struct PostOnly<H> {
    inner: H,
}

/// Refuse with 405 unless the method is POST, then decode the form body into
/// [`Request::form`] before calling `inner`.
pub fn post<H: Handler>(inner: H) -> PostOnly<H> {
    PostOnly { inner }
}

impl<H: Handler> PostOnly<H> {
    async fn serve(&self, request: &mut Request, response: &mut Response) -> Result<Disposition, Error> {
        if request.method != Method::POST {
            debug!(method = %request.method, "Not a POST");
            return Err(Error::Rejected(StatusCode::METHOD_NOT_ALLOWED));
        }

        request.read_form_data().await?;

        self.inner.call(request, response).await
    }
}

impl<H: Handler> Handler for PostOnly<H> {
    fn call<'a>(&'a self, request: &'a mut Request, response: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(self.serve(request, response))
    }
}
