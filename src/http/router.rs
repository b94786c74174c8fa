//! Route tables and per-connection dispatch.
//!
//! An [`App`] holds an ordered route table and may mount other apps under a
//! URL prefix. A request is first handed down through the mounts (longest
//! prefix first, stripping each prefix on the way), then matched against the
//! route table of the app it ends up in. The first matching route wins.

use std::{
    cmp::Reverse,
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock},
};

use axum::http::{
    header::{HeaderName, HeaderValue},
    HeaderMap, Method, StatusCode,
};
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tracing::{debug, info, trace, warn};

use crate::{
    error::Error,
    http::{
        pattern::{Captures, Pattern},
        request::Reader,
        Disposition, Handler, Request, Response,
    },
};

/// Longest request or header line accepted.
pub const MAX_LINE_LENGTH: u64 = 2048;

/// Most header lines accepted in one request.
pub const MAX_HEADERS: usize = 32;

/// How a route consumes request headers before its handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMode {
    /// Parse them into [`Request::headers`].
    #[default]
    Parse,

    /// Read and throw them away.
    Skip,

    /// Leave them unread for the handler.
    Leave,
}

/// Per-route options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteOptions {
    /// Overrides the app's [`HeaderMode`].
    pub headers: Option<HeaderMode>,
}

struct Route {
    pattern: Pattern,
    handler: Arc<dyn Handler>,
    options: RouteOptions,
}

/// A one-time hook run the first time an app receives a request.
pub type InitHook = Box<dyn Fn(&str) + Send + Sync>;

/// A route table plus mounted sub-apps.
pub struct App {
    name: String,
    prefix: String,
    routes: Vec<Route>,
    mounts: Vec<App>,
    headers: HeaderMode,
    on_init: Option<InitHook>,
    initialized: OnceLock<()>,
}

impl App {
    /// An empty app. The name is only used in logs.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            prefix: String::new(),
            routes: vec![],
            mounts: vec![],
            headers: HeaderMode::default(),
            on_init: None,
            initialized: OnceLock::new(),
        }
    }

    /// Add a route with default options.
    pub fn route(self, pattern: impl Into<Pattern>, handler: impl Handler) -> Self {
        self.route_with(pattern, handler, RouteOptions::default())
    }

    /// Add a route.
    pub fn route_with(
        mut self,
        pattern: impl Into<Pattern>,
        handler: impl Handler,
        options: RouteOptions,
    ) -> Self {
        self.routes.push(Route {
            pattern: pattern.into(),
            handler: Arc::new(handler),
            options,
        });
        self
    }

    /// Mount a sub-app at a prefix of this app's paths.
    pub fn mount(mut self, prefix: &str, mut app: App) -> Self {
        app.prefix = prefix.into();
        self.mounts.push(app);

        // Stable, so equal prefixes keep their mount order.
        self.mounts.sort_by_key(|app| Reverse(app.prefix.len()));
        self
    }

    /// The header mode for routes without their own.
    pub fn headers(mut self, mode: HeaderMode) -> Self {
        self.headers = mode;
        self
    }

    /// Run `hook` once, when the first request reaches this app.
    pub fn on_init(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_init = Some(Box::new(hook));
        self
    }

    /// Has the app seen a request yet?
    pub fn is_initialized(&self) -> bool {
        self.initialized.get().is_some()
    }

    fn ensure_initialized(&self) {
        self.initialized.get_or_init(|| {
            debug!(app = %self.name, "Initializing");
            if let Some(hook) = &self.on_init {
                hook(&self.name);
            }
        });
    }

    /// Walk down the mounts. Returns the app and the path relative to it.
    fn resolve(&self, path: &str) -> (&App, String) {
        let mut app = self;
        let mut path = path.to_owned();

        while let Some(sub) = app
            .mounts
            .iter()
            .find(|sub| path.starts_with(sub.prefix.as_str()))
        {
            path = path[sub.prefix.len()..].to_owned();
            if !path.starts_with('/') {
                path.insert(0, '/');
            }
            trace!(app = %sub.name, %path, "Mount");
            app = sub;
        }

        (app, path)
    }

    fn find(&self, path: &str) -> Option<(&Route, Option<Captures>)> {
        self.routes.iter().find_map(|route| {
            let captures = route.pattern.matches(path)?;
            Some((route, route.pattern.is_structural().then_some(captures)))
        })
    }
}

/// Dispatches connections to an [`App`] tree.
#[derive(Clone)]
pub struct Router {
    root: Arc<App>,
}

impl Router {
    /// Serve `root`.
    pub fn new(root: App) -> Self {
        Self {
            root: Arc::new(root),
        }
    }

    /// The root app.
    pub fn root(&self) -> &App {
        &self.root
    }

    /// Serve one connection.
    ///
    /// Never fails: problems are logged, answered with an error status if
    /// nothing was written yet, and the connection is closed.
    pub async fn dispatch<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: Reader = Box::new(BufReader::new(reader));
        let mut response = Response::new(Box::new(writer));

        let outcome = AssertUnwindSafe(self.handle(reader, &mut response))
            .catch_unwind()
            .await
            .unwrap_or(Err(Error::HandlerPanicked));

        let disposition = match outcome {
            Ok(disposition) => disposition,
            Err(e) => {
                warn!(%e, "Request failed");

                if !response.is_started() {
                    if let Err(e) = response.error(e.status()).await {
                        debug!(%e, "Could not report failure");
                    }
                }

                Disposition::Close
            }
        };

        if disposition == Disposition::Close {
            if let Err(e) = response.close().await {
                debug!(%e, "Problem closing connection");
            }
        }
    }

    async fn handle(&self, mut reader: Reader, response: &mut Response) -> Result<Disposition, Error> {
        let Some(line) = read_line(&mut reader).await? else {
            debug!("Connection closed before a request");
            return Ok(Disposition::Close);
        };

        let (method, target) = parse_request_line(&line)?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        let (app, path) = self.root.resolve(path);
        app.ensure_initialized();

        let Some((route, captures)) = app.find(&path) else {
            info!(%method, %path, app = %app.name, "No route");
            skip_headers(&mut reader).await?;
            response.error(StatusCode::NOT_FOUND).await?;

            return Ok(Disposition::Close);
        };

        info!(%method, %path, app = %app.name, "Request");

        let headers = match route.options.headers.unwrap_or(app.headers) {
            HeaderMode::Parse => Some(parse_headers(&mut reader).await?),
            HeaderMode::Skip => {
                skip_headers(&mut reader).await?;
                None
            }
            HeaderMode::Leave => None,
        };

        let mut request = Request::new(method, path, query.to_owned(), headers, captures, reader);

        route.handler.call(&mut request, response).await
    }
}

/// Read one line including its terminator.
/// `None` if the stream ended before any byte.
async fn read_line(reader: &mut Reader) -> Result<Option<Vec<u8>>, Error> {
    let mut line = vec![];
    let read = (&mut *reader)
        .take(MAX_LINE_LENGTH)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }

    if !line.ends_with(b"\n") && read as u64 == MAX_LINE_LENGTH {
        return Err(Error::BadRequest("line too long".into()));
    }

    Ok(Some(line))
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

fn parse_request_line(line: &[u8]) -> Result<(Method, &str), Error> {
    let line = std::str::from_utf8(line)
        .map_err(|_| Error::BadRequest("request line is not UTF-8".into()))?;

    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(_protocol), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::BadRequest(format!("bad request line `{}`", line.trim())));
    };

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::BadRequest(format!("bad method `{method}`")))?;

    Ok((method, target))
}

async fn skip_headers(reader: &mut Reader) -> Result<(), Error> {
    for _ in 0..MAX_HEADERS + 1 {
        match read_line(reader).await? {
            None => return Ok(()),
            Some(line) if is_blank(&line) => return Ok(()),
            Some(_) => {}
        }
    }

    Err(Error::Rejected(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE))
}

async fn parse_headers(reader: &mut Reader) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();

    for _ in 0..MAX_HEADERS + 1 {
        let line = match read_line(reader).await? {
            None => return Ok(headers),
            Some(line) if is_blank(&line) => return Ok(headers),
            Some(line) => line,
        };

        let colon = line
            .iter()
            .position(|&byte| byte == b':')
            .ok_or_else(|| Error::BadRequest("header line without `:`".into()))?;

        let name = HeaderName::from_bytes(line[..colon].trim_ascii())
            .map_err(|_| Error::BadRequest("bad header name".into()))?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
            .map_err(|_| Error::BadRequest(format!("bad value for header `{name}`")))?;

        headers.append(name, value);
    }

    Err(Error::Rejected(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;
    use tokio::io::{duplex, AsyncWriteExt};

    use super::*;
    use crate::http::handler_fn;

    /// Answers with `<tag> <path>`.
    fn echo(tag: &'static str) -> impl Handler {
        handler_fn(move |request, response| {
            Box::pin(async move {
                response.text(&format!("{tag} {}", request.path)).await?;
                Ok::<_, Error>(Disposition::Close)
            })
        })
    }

    async fn roundtrip(router: &Router, raw: &str) -> String {
        let (client, server) = duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(raw.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();

        router.dispatch(server_read, server_write).await;

        let mut out = String::new();
        client_read.read_to_string(&mut out).await.unwrap();
        out
    }

    fn body(response: &str) -> &str {
        response.split_once("\r\n\r\n").unwrap().1
    }

    fn status(response: &str) -> &str {
        response.split(' ').nth(1).unwrap()
    }

    #[tokio::test]
    async fn literal_route() {
        let router = Router::new(App::new("root").route("/", echo("root")));

        let out = roundtrip(&router, "GET / HTTP/1.0\r\n\r\n").await;

        assert_eq!(status(&out), "200");
        assert_eq!(body(&out), "root /");
    }

    #[tokio::test]
    async fn longer_mount_wins_over_root_mount() {
        let router = Router::new(
            App::new("top")
                .mount("/", App::new("root").route("/a/x", echo("root")))
                .mount("/a", App::new("a").route("/x", echo("a"))),
        );

        let out = roundtrip(&router, "GET /a/x HTTP/1.0\r\n\r\n").await;

        assert_eq!(body(&out), "a /x");
    }

    #[tokio::test]
    async fn mounts_nest() {
        let inner = App::new("inner").route("/leaf", echo("inner"));
        let outer = App::new("outer").mount("/in", inner);
        let router = Router::new(App::new("root").mount("/out", outer));

        let out = roundtrip(&router, "GET /out/in/leaf?x=1 HTTP/1.0\r\n\r\n").await;

        assert_eq!(body(&out), "inner /leaf");
    }

    #[tokio::test]
    async fn mount_prefix_itself_becomes_slash() {
        let router = Router::new(
            App::new("root").mount("/cmd", App::new("cmd").route("/", echo("cmd"))),
        );

        let out = roundtrip(&router, "GET /cmd HTTP/1.0\r\n\r\n").await;

        assert_eq!(body(&out), "cmd /");
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let router = Router::new(
            App::new("root")
                .route(crate::http::pattern::Template::new("/{any}"), echo("template"))
                .route("/x", echo("literal")),
        );

        let out = roundtrip(&router, "GET /x HTTP/1.0\r\n\r\n").await;

        assert_eq!(body(&out), "template /x");
    }

    #[tokio::test]
    async fn structural_routes_capture() {
        let router = Router::new(App::new("root").route(
            crate::http::pattern::Template::new("/set/{field}"),
            handler_fn(|request, response| {
                Box::pin(async move {
                    let captures = request.captures.as_ref().unwrap();
                    response.text(&captures["field"]).await?;
                    Ok::<_, Error>(Disposition::Close)
                })
            }),
        ));

        let out = roundtrip(&router, "GET /set/gms HTTP/1.0\r\n\r\n").await;

        assert_eq!(body(&out), "gms");
    }

    #[tokio::test]
    async fn literal_routes_have_no_captures() {
        let router = Router::new(App::new("root").route(
            "/x",
            handler_fn(|request, response| {
                Box::pin(async move {
                    response
                        .text(&format!("{}", request.captures.is_some()))
                        .await?;
                    Ok::<_, Error>(Disposition::Close)
                })
            }),
        ));

        let out = roundtrip(&router, "GET /x HTTP/1.0\r\n\r\n").await;

        assert_eq!(body(&out), "false");
    }

    #[tokio::test]
    async fn unmatched_is_404() {
        let router = Router::new(App::new("root").route("/", echo("root")));

        let out = roundtrip(&router, "GET /nope HTTP/1.0\r\nHost: x\r\n\r\n").await;

        assert_eq!(status(&out), "404");
        assert_eq!(body(&out), "404\n");
    }

    #[tokio::test]
    async fn empty_connection_is_closed_silently() {
        let router = Router::new(App::new("root").route("/", echo("root")));

        let out = roundtrip(&router, "").await;

        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn garbage_request_line_is_400() {
        let router = Router::new(App::new("root").route("/", echo("root")));

        let out = roundtrip(&router, "HELLO\r\n\r\n").await;

        assert_eq!(status(&out), "400");
    }

    #[tokio::test]
    async fn header_modes() {
        let router = Router::new(
            App::new("root")
                .route(
                    "/parse",
                    handler_fn(|request, response| {
                        Box::pin(async move {
                            let value = request.header("x-test").unwrap().to_str().unwrap();
                            response.text(value).await?;
                            Ok::<_, Error>(Disposition::Close)
                        })
                    }),
                )
                .route_with(
                    "/skip",
                    handler_fn(|request, response| {
                        Box::pin(async move {
                            let mut rest = String::new();
                            request.reader().read_to_string(&mut rest).await?;
                            response
                                .text(&format!("{} {rest}", request.headers.is_none()))
                                .await?;
                            Ok::<_, Error>(Disposition::Close)
                        })
                    }),
                    RouteOptions {
                        headers: Some(HeaderMode::Skip),
                    },
                )
                .route_with(
                    "/leave",
                    handler_fn(|request, response| {
                        Box::pin(async move {
                            let mut first = String::new();
                            request.reader().read_line(&mut first).await?;
                            response.text(first.trim_end()).await?;
                            Ok::<_, Error>(Disposition::Close)
                        })
                    }),
                    RouteOptions {
                        headers: Some(HeaderMode::Leave),
                    },
                ),
        );

        let parsed = roundtrip(&router, "GET /parse HTTP/1.0\r\nX-Test: yes\r\n\r\n").await;
        assert_eq!(body(&parsed), "yes");

        let skipped = roundtrip(&router, "GET /skip HTTP/1.0\r\nX-Test: yes\r\n\r\nbody").await;
        assert_eq!(body(&skipped), "true body");

        let left = roundtrip(&router, "GET /leave HTTP/1.0\r\nX-Test: yes\r\n\r\n").await;
        assert_eq!(body(&left), "X-Test: yes");
    }

    #[tokio::test]
    async fn app_header_mode_applies_to_its_routes() {
        let router = Router::new(
            App::new("root").headers(HeaderMode::Skip).route(
                "/",
                handler_fn(|request, response| {
                    Box::pin(async move {
                        response
                            .text(&format!("{}", request.headers.is_some()))
                            .await?;
                        Ok::<_, Error>(Disposition::Close)
                    })
                }),
            ),
        );

        let out = roundtrip(&router, "GET / HTTP/1.0\r\nX-Test: yes\r\n\r\n").await;

        assert_eq!(body(&out), "false");
    }

    #[tokio::test]
    async fn handler_errors_become_statuses() {
        let router = Router::new(App::new("root").route(
            "/",
            handler_fn(|_request, _response| {
                Box::pin(async move { Err::<Disposition, _>(Error::Rejected(StatusCode::IM_A_TEAPOT)) })
            }),
        ));

        let out = roundtrip(&router, "GET / HTTP/1.0\r\n\r\n").await;

        assert_eq!(status(&out), "418");
    }

    #[tokio::test]
    async fn handler_panics_are_contained() {
        let router = Router::new(App::new("root").route(
            "/",
            handler_fn(|_request, _response| {
                Box::pin(async move {
                    if true {
                        panic!("boom");
                    }
                    Ok::<_, Error>(Disposition::Close)
                })
            }),
        ));

        let out = roundtrip(&router, "GET / HTTP/1.0\r\n\r\n").await;

        assert_eq!(status(&out), "500");
    }

    #[tokio::test]
    async fn apps_initialize_once_on_first_request() {
        let count = Arc::new(AtomicUsize::new(0));
        let hook_count = count.clone();

        let router = Router::new(
            App::new("root").route("/", echo("root")).mount(
                "/sub",
                App::new("sub")
                    .route("/", echo("sub"))
                    .on_init(move |_| {
                        hook_count.fetch_add(1, Ordering::SeqCst);
                    }),
            ),
        );

        roundtrip(&router, "GET / HTTP/1.0\r\n\r\n").await;
        assert!(router.root().is_initialized());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        roundtrip(&router, "GET /sub/ HTTP/1.0\r\n\r\n").await;
        roundtrip(&router, "GET /sub/ HTTP/1.0\r\n\r\n").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn too_many_headers_are_refused() {
        let router = Router::new(App::new("root").route("/", echo("root")));

        let mut raw = String::from("GET / HTTP/1.0\r\n");
        for i in 0..MAX_HEADERS + 1 {
            raw += &format!("X-{i}: {i}\r\n");
        }
        raw += "\r\n";

        let out = roundtrip(&router, &raw).await;

        assert_eq!(status(&out), "431");
    }
}
