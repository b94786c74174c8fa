use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use headers::{ContentLength, HeaderMapExt};
use tokio::io::{AsyncBufRead, AsyncReadExt};
use tracing::debug;

use crate::{
    error::Error,
    http::{form::Form, pattern::Captures},
};

/// Form bodies larger than this are refused.
pub const MAX_FORM_LENGTH: u64 = 1024;

/// The read half of a connection.
pub type Reader = Box<dyn AsyncBufRead + Send + Unpin>;

/// A request, as far as it has been read.
pub struct Request {
    /// The request method.
    pub method: Method,

    /// The path, with the prefixes of any mounts it went through removed.
    pub path: String,

    /// Everything after `?`, or empty.
    pub query: String,

    /// Only present if the route parses headers.
    pub headers: Option<HeaderMap>,

    /// Only present after [`Request::read_form_data`] or [`Request::parse_query`].
    pub form: Option<Form>,

    /// What a structural route pattern captured.
    pub captures: Option<Captures>,

    reader: Reader,
}

impl Request {
    pub(crate) fn new(
        method: Method,
        path: String,
        query: String,
        headers: Option<HeaderMap>,
        captures: Option<Captures>,
        reader: Reader,
    ) -> Self {
        Self {
            method,
            path,
            query,
            headers,
            form: None,
            captures,
            reader,
        }
    }

    /// The rest of the connection: unread headers (for routes which leave
    /// them) and the body.
    pub fn reader(&mut self) -> &mut Reader {
        &mut self.reader
    }

    /// Look up a parsed header.
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.as_ref()?.get(name)
    }

    /// Read the body as a URL-encoded form.
    ///
    /// Needs parsed headers with a `Content-Length`.
    /// Exactly that many bytes are read.
    pub async fn read_form_data(&mut self) -> Result<&Form, Error> {
        let headers = self
            .headers
            .as_ref()
            .ok_or_else(|| Error::BadRequest("headers were not parsed".into()))?;

        let ContentLength(length) = headers
            .typed_get::<ContentLength>()
            .ok_or(Error::LengthRequired)?;

        if length > MAX_FORM_LENGTH {
            return Err(Error::Rejected(StatusCode::PAYLOAD_TOO_LARGE));
        }

        let mut body = vec![0; length as usize];
        self.reader.read_exact(&mut body).await?;
        debug!(length, "Read form body");

        Ok(self.form.insert(Form::parse(&body)))
    }

    /// Decode the query string as a form.
    pub fn parse_query(&mut self) -> &Form {
        let form = Form::parse(self.query.as_bytes());
        self.form.insert(form)
    }
}
