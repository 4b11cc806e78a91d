//! Request/response exchange with a DTR server.
//!
//! [`Transport`] is the seam between the enumerator and the network:
//! [`HttpTransport`] talks to a real server over one kept-alive connection,
//! tests plug in an in-memory server. [`request`] layers the protocol rules
//! (single reconnect on a dropped connection, 2xx status check) over any
//! transport.

use std::future::Future;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::{debug, info, instrument, warn};

use crate::errors::ProtocolError;

const XML_CONTENT_TYPE: &str = "application/xml; charset=\"utf-8\"";

/// Methods the DTR protocol uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtrMethod {
    Propfind,
    Report,
    Get,
}

impl DtrMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Propfind => "PROPFIND",
            Self::Report => "REPORT",
            Self::Get => "GET",
        }
    }
}

impl std::fmt::Display for DtrMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a response, either still on the wire or already in memory.
#[derive(Debug)]
pub enum ResponseBody {
    Stream(reqwest::Response),
    Memory(Vec<u8>),
}

/// A response whose body has not been read yet.
#[derive(Debug)]
pub struct DtrResponse {
    pub status: u16,
    pub reason: String,
    body: ResponseBody,
}

impl DtrResponse {
    pub fn from_bytes(status: u16, reason: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            reason: reason.into(),
            body: ResponseBody::Memory(body.into()),
        }
    }

    fn from_http(resp: reqwest::Response) -> Self {
        let status = resp.status();
        Self {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            body: ResponseBody::Stream(resp),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body.
    pub async fn bytes(self) -> Result<Vec<u8>, ProtocolError> {
        match self.body {
            ResponseBody::Stream(resp) => Ok(resp.bytes().await?.to_vec()),
            ResponseBody::Memory(data) => Ok(data),
        }
    }
}

/// A connection to a DTR server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Server name used in error messages.
    fn server(&self) -> &str;

    /// Send one request. A connection the server dropped before answering
    /// must surface as [`ProtocolError::ConnectionDropped`].
    async fn send(
        &self,
        method: DtrMethod,
        path: &str,
        payload: Option<&str>,
    ) -> Result<DtrResponse, ProtocolError>;

    /// Tear down the connection; the next `send` reconnects.
    async fn close(&self);
}

/// Runs `op`, and if it fails with a dropped connection, runs `on_drop` and
/// then `op` exactly once more. The second outcome is returned as is.
pub async fn retry_on_dropped_connection<T, Op, OpFut, Reconnect, ReconnectFut>(
    mut op: Op,
    mut on_drop: Reconnect,
) -> Result<T, ProtocolError>
where
    Op: FnMut() -> OpFut,
    OpFut: Future<Output = Result<T, ProtocolError>>,
    Reconnect: FnMut() -> ReconnectFut,
    ReconnectFut: Future<Output = ()>,
{
    match op().await {
        Err(e) if e.is_connection_drop() => {
            debug!(error = %e, "connection dropped, reconnecting once");
            on_drop().await;
            op().await
        }
        other => other,
    }
}

/// Issue a request with the DTR protocol rules applied: one silent retry on
/// a dropped connection, a disconnect on any other fault, and a
/// [`ProtocolError::BadStatus`] for anything outside 2xx.
#[instrument(skip(transport, payload), fields(server = %transport.server()))]
pub async fn request<T: Transport + ?Sized>(
    transport: &T,
    method: DtrMethod,
    path: &str,
    payload: Option<&str>,
) -> Result<DtrResponse, ProtocolError> {
    let result = retry_on_dropped_connection(
        || transport.send(method, path, payload),
        || transport.close(),
    )
    .await;

    let resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            transport.close().await;
            return Err(e);
        }
    };

    if !resp.is_success() {
        warn!(status = resp.status, reason = %resp.reason, "bad DTR response");
        transport.close().await;
        return Err(ProtocolError::BadStatus {
            server: transport.server().to_string(),
            status: resp.status,
            reason: resp.reason,
        });
    }

    debug!(status = resp.status, "DTR request ok");
    Ok(resp)
}

/// Resolve the configured server string into a base URL.
pub fn base_url(server: &str) -> String {
    let server = server.trim_end_matches('/');
    if server.contains("://") {
        server.to_string()
    } else {
        format!("http://{}", server)
    }
}

/// HTTP transport with Basic authentication over a lazily opened,
/// kept-alive connection.
pub struct HttpTransport {
    server: String,
    base_url: String,
    username: String,
    password: String,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let server = server.into();
        let base_url = base_url(&server);
        info!(base_url = %base_url, "created DTR transport");
        Self {
            server,
            base_url,
            username: username.into(),
            password: password.into(),
            client: Mutex::new(None),
        }
    }

    fn connection(&self) -> Result<reqwest::Client, ProtocolError> {
        let mut slot = self.client.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let mut headers = HeaderMap::new();
        headers.insert("Depth", HeaderValue::from_static("0"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(1)
            .build()?;
        debug!(server = %self.server, "opened DTR connection");
        *slot = Some(client.clone());
        Ok(client)
    }

    fn classify(&self, err: reqwest::Error) -> ProtocolError {
        if err.is_connect() || err.is_request() {
            ProtocolError::ConnectionDropped {
                server: self.server.clone(),
                detail: err.to_string(),
            }
        } else {
            ProtocolError::Http(err)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn server(&self) -> &str {
        &self.server
    }

    async fn send(
        &self,
        method: DtrMethod,
        path: &str,
        payload: Option<&str>,
    ) -> Result<DtrResponse, ProtocolError> {
        let http_method = reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| {
            ProtocolError::InvalidRequest {
                method: method.to_string(),
                path: path.to_string(),
                detail: e.to_string(),
            }
        })?;
        let url = format!("{}{}", self.base_url, path);
        let client = self.connection()?;

        let mut req = client
            .request(http_method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = payload.filter(|p| !p.is_empty()) {
            req = req
                .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                .body(body.to_string());
        }

        let resp = req.send().await.map_err(|e| self.classify(e))?;
        Ok(DtrResponse::from_http(resp))
    }

    async fn close(&self) {
        let mut slot = self.client.lock().unwrap_or_else(|e| e.into_inner());
        if slot.take().is_some() {
            debug!(server = %self.server, "closed DTR connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dropped() -> ProtocolError {
        ProtocolError::ConnectionDropped {
            server: "dtr".into(),
            detail: "reset".into(),
        }
    }

    /// Fails with a dropped connection a fixed number of times, then answers
    /// with the configured status.
    struct FlakyTransport {
        drops: usize,
        status: u16,
        sends: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FlakyTransport {
        fn new(drops: usize, status: u16) -> Self {
            Self {
                drops,
                status,
                sends: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn server(&self) -> &str {
            "dtr:50000"
        }

        async fn send(
            &self,
            _method: DtrMethod,
            _path: &str,
            _payload: Option<&str>,
        ) -> Result<DtrResponse, ProtocolError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.drops {
                return Err(dropped());
            }
            Ok(DtrResponse::from_bytes(self.status, "Whatever", b"<ok/>".to_vec()))
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_single_drop_is_retried_silently() {
        let transport = FlakyTransport::new(1, 207);
        let resp = request(&transport, DtrMethod::Propfind, "/dtr/act/1", None)
            .await
            .unwrap();
        assert_eq!(resp.bytes().await.unwrap(), b"<ok/>");
        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_drop_propagates() {
        let transport = FlakyTransport::new(2, 200);
        let err = request(&transport, DtrMethod::Get, "/x", None)
            .await
            .unwrap_err();
        assert!(err.is_connection_drop());
        assert_eq!(transport.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_status_is_error() {
        let transport = FlakyTransport::new(0, 404);
        let err = request(&transport, DtrMethod::Propfind, "/missing", None)
            .await
            .unwrap_err();
        match err {
            ProtocolError::BadStatus { server, status, .. } => {
                assert_eq!(server, "dtr:50000");
                assert_eq!(status, 404);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_helper_leaves_other_errors_alone() {
        let calls = AtomicUsize::new(0);
        let reconnects = AtomicUsize::new(0);
        let result: Result<(), _> = retry_on_dropped_connection(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProtocolError::InvalidRequest {
                        method: "GET".into(),
                        path: "/".into(),
                        detail: "bad".into(),
                    })
                }
            },
            || {
                reconnects.fetch_add(1, Ordering::SeqCst);
                async {}
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("dtr:50000"), "http://dtr:50000");
        assert_eq!(base_url("https://dtr.example.com/"), "https://dtr.example.com");
    }
}
