//! Loopback HTTP listener that captures the OAuth2 redirect.
//!
//! The provider redirects the browser to `/authorize`. The listener answers
//! with a bridge page whose script forwards the full browser location
//! (including any fragment, which never reaches a server) to
//! `/token?url_with_fragment=...`. The forwarded URL is the capture result.
//!
//! ```text
//! WaitAuthorizeRequest -> ServeBridgePage -> WaitTokenRequest -> Captured
//! ```
//!
//! Each waiting state has its own deadline. Unknown paths get a 404 and
//! requests arriving out of order get a 409; neither changes state.
//! Connections are read concurrently, each with its own short read timeout,
//! so an idle connection never delays the others.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, SyncError};

/// Path the provider redirects to.
pub const AUTHORIZE_PATH: &str = "/authorize";

/// Path the bridge page forwards the captured URL to.
pub const TOKEN_PATH: &str = "/token";

/// Query parameter carrying the forwarded URL.
pub const CAPTURE_PARAM: &str = "url_with_fragment";

/// Built-in bridge page, used when none exists on disk.
const DEFAULT_BRIDGE_PAGE: &[u8] = include_bytes!("../assets/index.html");

const MAX_HEADER_LINES: usize = 100;

/// Cap on the request line plus headers of one request.
const MAX_REQUEST_HEAD_BYTES: u64 = 16 * 1024;

/// How long a connection may take to deliver its request.
pub const DEFAULT_REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Read the bridge page from `path`, falling back to the built-in copy.
pub fn load_bridge_page(path: &Path) -> Result<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            debug!("Using bridge page from {}", path.display());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No bridge page at {}, using built-in page", path.display());
            Ok(DEFAULT_BRIDGE_PAGE.to_vec())
        }
        Err(e) => Err(e.into()),
    }
}

/// Progress of one redirect capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    WaitAuthorizeRequest,
    ServeBridgePage,
    WaitTokenRequest,
    Captured,
}

impl ListenerState {
    fn describe(self) -> &'static str {
        match self {
            ListenerState::WaitAuthorizeRequest => "the authorization redirect",
            ListenerState::ServeBridgePage => "the bridge page to be delivered",
            ListenerState::WaitTokenRequest => "the forwarded redirect URL",
            ListenerState::Captured => "nothing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Authorize,
    Token,
}

impl Route {
    fn resolve(path: &str) -> Option<Route> {
        match path {
            AUTHORIZE_PATH => Some(Route::Authorize),
            TOKEN_PATH => Some(Route::Token),
            _ => None,
        }
    }
}

/// The parts of an inbound request the listener cares about.
#[derive(Debug)]
struct Request {
    method: String,
    target: String,
}

impl Request {
    fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    fn query_param(&self, name: &str) -> Option<String> {
        let url = Url::parse(&format!("http://localhost{}", self.target)).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Single-use redirect listener bound to a loopback address.
pub struct RedirectListener {
    listener: TcpListener,
    bridge_page: Vec<u8>,
    step_timeout: Duration,
    request_timeout: Duration,
}

impl RedirectListener {
    /// Bind the listener. Binding happens before the browser is launched so
    /// the first redirect cannot arrive before anyone is listening.
    pub async fn bind(addr: SocketAddr, bridge_page: Vec<u8>, step_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        debug!("Redirect listener bound to {}", listener.local_addr()?);
        Ok(Self {
            listener,
            bridge_page,
            step_timeout,
            request_timeout: DEFAULT_REQUEST_READ_TIMEOUT,
        })
    }

    /// Limit how long a single connection may take to send its request.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The redirect URI to register with the provider.
    pub fn redirect_uri(&self) -> Result<Url> {
        let url = Url::parse(&format!("http://{}{}", self.local_addr()?, AUTHORIZE_PATH))?;
        Ok(url)
    }

    /// Serve requests until the forwarded redirect URL arrives.
    pub async fn capture(&self) -> Result<Url> {
        let mut state = ListenerState::WaitAuthorizeRequest;
        let mut deadline = Instant::now() + self.step_timeout;
        let mut reads: JoinSet<Option<Inbound>> = JoinSet::new();

        info!("Waiting for authorization redirect on {}", self.local_addr()?);

        loop {
            let Inbound {
                mut stream,
                peer,
                request,
            } = tokio::select! {
                _ = sleep_until(deadline) => {
                    return Err(SyncError::ListenerTimeout(state.describe().to_string()));
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            reads.spawn(read_inbound(stream, peer, self.request_timeout));
                        }
                        Err(e) => debug!("Failed to accept connection: {}", e),
                    }
                    continue;
                }
                Some(joined) = reads.join_next() => match joined {
                    Ok(Some(inbound)) => inbound,
                    Ok(None) => continue,
                    Err(e) => {
                        debug!("Request reader failed: {}", e);
                        continue;
                    }
                },
            };

            debug!(
                "{} {} from {} while in state {:?}",
                request.method, request.target, peer, state
            );

            match (Route::resolve(request.path()), state) {
                (Some(Route::Authorize), ListenerState::WaitAuthorizeRequest) => {
                    state = ListenerState::ServeBridgePage;
                    respond(&mut stream, 200, "OK", &self.bridge_page).await;
                    debug!("Listener served bridge page in state {:?}", state);

                    state = ListenerState::WaitTokenRequest;
                    deadline = Instant::now() + self.step_timeout;
                }
                (Some(Route::Token), ListenerState::WaitTokenRequest) => {
                    let captured = request
                        .query_param(CAPTURE_PARAM)
                        .and_then(|value| Url::parse(&value).ok());

                    match captured {
                        Some(url) => {
                            let page = status_page(
                                "Authorization received",
                                "You can close this window and return to the terminal.",
                            );
                            respond(&mut stream, 200, "OK", page.as_bytes()).await;

                            state = ListenerState::Captured;
                            debug!("Listener reached state {:?}", state);
                            return Ok(url);
                        }
                        None => {
                            let page = status_page(
                                "Bad request",
                                "The forwarded redirect URL is missing or invalid.",
                            );
                            respond(&mut stream, 400, "Bad Request", page.as_bytes()).await;
                        }
                    }
                }
                (Some(_), _) => {
                    let page = status_page("Unexpected request", "This step is not expected yet.");
                    respond(&mut stream, 409, "Conflict", page.as_bytes()).await;
                }
                (None, _) => {
                    let page = status_page("Not found", "Nothing is served at this path.");
                    respond(&mut stream, 404, "Not Found", page.as_bytes()).await;
                }
            }
        }
    }
}

/// A parsed request together with the connection to answer it on.
struct Inbound {
    stream: TcpStream,
    peer: SocketAddr,
    request: Request,
}

/// Read one request from a fresh connection, giving up after `limit`.
///
/// Runs off the state machine so an idle or slow client cannot hold up
/// other connections.
async fn read_inbound(mut stream: TcpStream, peer: SocketAddr, limit: Duration) -> Option<Inbound> {
    match timeout(limit, read_request(&mut stream)).await {
        Err(_) => {
            debug!("Dropping idle connection from {}", peer);
            None
        }
        Ok(Ok(Some(request))) => Some(Inbound {
            stream,
            peer,
            request,
        }),
        Ok(Ok(None)) => {
            debug!("Ignoring malformed request from {}", peer);
            None
        }
        Ok(Err(e)) => {
            debug!("Failed to read request from {}: {}", peer, e);
            None
        }
    }
}

/// Read the request line and discard headers.
///
/// Returns `None` for a connection that closes, sends a malformed line, or
/// exceeds [`MAX_REQUEST_HEAD_BYTES`] before the request line ends.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_HEAD_BYTES));

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 || !request_line.ends_with('\n') {
        return Ok(None);
    }

    // Request line looks like: GET /token?url_with_fragment=... HTTP/1.1
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    if !target.starts_with('/') {
        return Ok(None);
    }

    let mut line = String::new();
    for _ in 0..MAX_HEADER_LINES {
        line.clear();
        if reader.read_line(&mut line).await? == 0 || line.trim_end().is_empty() {
            break;
        }
    }

    Ok(Some(Request {
        method: method.to_string(),
        target: target.to_string(),
    }))
}

async fn respond(stream: &mut TcpStream, status: u16, reason: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        Content-Length: {}\r\n\
        Cache-Control: no-store\r\n\
        Connection: close\r\n\
        \r\n",
        status,
        reason,
        body.len()
    );

    let result = async {
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(body).await?;
        stream.flush().await?;
        stream.shutdown().await
    }
    .await;

    if let Err(e) = result {
        debug!("Failed to write {} response: {}", status, e);
    }
}

fn status_page(title: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 50px;">
    <h1>{title}</h1>
    <p>{message}</p>
</body>
</html>"#
    )
}
