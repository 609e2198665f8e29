//! HTTP CONNECT tunnel dialer
//!
//! Opens a raw TCP stream to a destination through an HTTP forward proxy.
//! Exactly one request is written and exactly one response head is read.
//! The returned stream carries the destination's bytes untranslated, so it
//! can be used exactly like a direct connection.

use super::{ProxyError, Target};
use crate::context::Context;
use crate::transport::Dialer;
use base64::Engine;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};
use url::{Host, Url};

/// Port used when the proxy URL does not name one
const DEFAULT_PROXY_PORT: u16 = 80;

/// Upper bound on the size of the response head (status line and headers)
const MAX_RESPONSE_HEAD: usize = 64 * 1024;

/// Progress of a single CONNECT dial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Idle,
    ProxyDialed,
    RequestSent,
    ResponseParsed,
    TunnelEstablished,
    Failed,
}

/// Response head returned by the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    /// e.g. `HTTP/1.1`
    pub version: String,
    pub code: u16,
    /// Status code and reason phrase as sent, e.g. `403 Forbidden`
    pub status: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectResponse {
    pub fn is_ok(&self) -> bool {
        self.code == 200
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Dials destinations through an HTTP CONNECT proxy
#[derive(Debug, Clone, Default)]
pub struct ConnectDialer {
    dialer: Dialer,
}

impl ConnectDialer {
    /// Create a CONNECT dialer that reaches proxies with `dialer`
    pub fn new(dialer: Dialer) -> Self {
        Self { dialer }
    }

    /// Tunnel a TCP connection to `destination` through `proxy`.
    ///
    /// Any failure closes the proxy connection before returning. No retries
    /// are attempted.
    pub async fn dial(
        &self,
        ctx: &Context,
        destination: &str,
        proxy: &Url,
    ) -> Result<TcpStream, ProxyError> {
        Target::parse(destination)?;
        let proxy_addr = proxy_address(proxy)?;
        let request = connect_request(destination, proxy)?;

        let mut state = ConnectState::Idle;
        let outcome = ctx
            .run(self.establish(ctx, destination, &request, &proxy_addr, &mut state))
            .await
            .unwrap_or_else(|e| Err(ProxyError::Context(e)));

        match outcome {
            Ok(stream) => {
                advance(&mut state, ConnectState::TunnelEstablished);
                debug!("Tunnel to {} established via {}", destination, proxy_addr);
                Ok(stream)
            }
            Err(e) => {
                debug!(
                    "CONNECT to {} via {} failed after {:?}: {}",
                    destination, proxy_addr, state, e
                );
                advance(&mut state, ConnectState::Failed);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        ctx: &Context,
        destination: &str,
        request: &str,
        proxy_addr: &str,
        state: &mut ConnectState,
    ) -> Result<TcpStream, ProxyError> {
        let mut stream = self
            .dialer
            .dial(ctx, proxy_addr)
            .await
            .map_err(|source| ProxyError::Dial {
                proxy: proxy_addr.to_string(),
                source,
            })?;
        advance(state, ConnectState::ProxyDialed);

        let exchange_error = |source| ProxyError::Exchange {
            destination: destination.to_string(),
            proxy: proxy_addr.to_string(),
            source,
        };

        stream
            .write_all(request.as_bytes())
            .await
            .map_err(exchange_error)?;
        stream.flush().await.map_err(exchange_error)?;
        advance(state, ConnectState::RequestSent);

        let mut reader = BufReader::new(stream);
        let response = read_response(&mut reader)
            .await
            .map_err(|e| match e {
                HeadError::Io(source) => exchange_error(source),
                HeadError::Malformed(reason) => ProxyError::MalformedResponse {
                    destination: destination.to_string(),
                    proxy: proxy_addr.to_string(),
                    reason,
                },
            })?;
        advance(state, ConnectState::ResponseParsed);

        if !response.is_ok() {
            return Err(ProxyError::Status {
                destination: destination.to_string(),
                proxy: proxy_addr.to_string(),
                status: response.status,
            });
        }

        // Bytes sent ahead of tunnel establishment are a protocol violation
        let buffered = reader.buffer().len();
        if buffered > 0 {
            return Err(ProxyError::UnexpectedData {
                proxy: proxy_addr.to_string(),
                bytes: buffered,
            });
        }

        Ok(reader.into_inner())
    }
}

fn advance(state: &mut ConnectState, next: ConnectState) {
    trace!("CONNECT state {:?} -> {:?}", state, next);
    *state = next;
}

/// `host:port` of the proxy, port 80 when the URL omits one
pub(crate) fn proxy_address(proxy: &Url) -> Result<String, ProxyError> {
    let host = proxy.host_str().filter(|h| !h.is_empty()).ok_or_else(|| {
        ProxyError::InvalidProxyUrl {
            value: proxy.to_string(),
            reason: "missing host".to_string(),
        }
    })?;
    Ok(format!("{}:{}", host, proxy.port().unwrap_or(DEFAULT_PROXY_PORT)))
}

/// Proxy host name without port or IPv6 brackets
fn proxy_hostname(proxy: &Url) -> String {
    match proxy.host() {
        Some(Host::Ipv6(ip)) => ip.to_string(),
        Some(host) => host.to_string(),
        None => String::new(),
    }
}

fn connect_request(destination: &str, proxy: &Url) -> Result<String, ProxyError> {
    let mut request = format!(
        "CONNECT {} HTTP/1.1\r\nHost: {}\r\n",
        destination,
        proxy_hostname(proxy)
    );

    if !proxy.username().is_empty() {
        let credentials = format!(
            "{}:{}",
            decode_userinfo(proxy, proxy.username())?,
            decode_userinfo(proxy, proxy.password().unwrap_or(""))?
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encoded));
    }

    request.push_str("\r\n");
    Ok(request)
}

/// Userinfo as sent on the wire; `Url` keeps it percent-encoded
fn decode_userinfo(proxy: &Url, part: &str) -> Result<String, ProxyError> {
    percent_decode_str(part)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ProxyError::InvalidProxyUrl {
            value: proxy.host_str().unwrap_or_default().to_string(),
            reason: "proxy credentials are not valid UTF-8".to_string(),
        })
}

#[derive(Debug)]
enum HeadError {
    Io(std::io::Error),
    Malformed(String),
}

impl From<std::io::Error> for HeadError {
    fn from(e: std::io::Error) -> Self {
        HeadError::Io(e)
    }
}

/// Read one CRLF- or LF-terminated line, charging it against `budget`
async fn read_line(
    reader: &mut BufReader<TcpStream>,
    budget: &mut usize,
) -> Result<String, HeadError> {
    let mut line = Vec::new();
    let n = (&mut *reader)
        .take(*budget as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if !line.ends_with(b"\n") {
        return Err(HeadError::Malformed(if n == *budget {
            "response head too large".to_string()
        } else {
            "unexpected EOF".to_string()
        }));
    }
    *budget -= n;

    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }
    String::from_utf8(line).map_err(|_| HeadError::Malformed("non UTF-8 response head".to_string()))
}

async fn read_response(reader: &mut BufReader<TcpStream>) -> Result<ConnectResponse, HeadError> {
    let mut budget = MAX_RESPONSE_HEAD;

    let status_line = read_line(reader, &mut budget).await?;
    let (version, status) = status_line
        .split_once(' ')
        .filter(|(version, _)| version.starts_with("HTTP/"))
        .ok_or_else(|| HeadError::Malformed(format!("malformed HTTP response {:?}", status_line)))?;
    let status = status.trim_start().to_string();

    let code = status
        .get(..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse::<u16>().ok())
        .filter(|_| status.len() == 3 || status.as_bytes()[3] == b' ')
        .ok_or_else(|| HeadError::Malformed(format!("malformed HTTP status code {:?}", status)))?;

    let mut headers = Vec::new();
    loop {
        let line = read_line(reader, &mut budget).await?;
        if line.is_empty() {
            break;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| HeadError::Malformed(format!("malformed MIME header line {:?}", line)))?;
        headers.push((key.trim().to_string(), value.trim().to_string()));
    }

    Ok(ConnectResponse {
        version: version.to_string(),
        code,
        status,
        headers,
    })
}
