//! Request dispatch pipeline
//!
//! One dispatch per client request: loop over selector picks until success or
//! the attempt budget runs out, recording every attempt in the request log
//! and feeding counters back into the inventory.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::error::{Result, RotaError};
use crate::models::{Proxy, ProxyStatus, RequestRecord, RotationSettings};
use crate::proxy::rotation::{DynamicSelector, ProxySelector};
use crate::proxy::transport::{ProxyConnection, ProxyTransport};
use crate::proxy::tunnel::TunnelHandler;
use crate::repository::{ProxyRepository, RequestLogRepository};

/// The accounting surface one dispatch touches: the append-only request log
/// and the proxy inventory (counters and status).
#[async_trait]
pub trait AccountingStore: Send + Sync {
    /// Append one attempt row
    async fn append(&self, record: &RequestRecord) -> Result<()>;

    /// Bump the lifetime counters for one attempt
    async fn record_attempt(
        &self,
        proxy_id: i32,
        success: bool,
        response_time_ms: i32,
    ) -> Result<()>;

    /// Transition an upstream's status
    async fn set_status(&self, proxy_id: i32, status: ProxyStatus) -> Result<()>;

    /// Current active pool
    async fn list_active(&self) -> Result<Vec<Proxy>>;
}

/// Database-backed accounting store
#[derive(Clone)]
pub struct DbAccountingStore {
    proxy_repo: ProxyRepository,
    log_repo: RequestLogRepository,
}

impl DbAccountingStore {
    pub fn new(proxy_repo: ProxyRepository, log_repo: RequestLogRepository) -> Self {
        Self {
            proxy_repo,
            log_repo,
        }
    }
}

#[async_trait]
impl AccountingStore for DbAccountingStore {
    async fn append(&self, record: &RequestRecord) -> Result<()> {
        self.log_repo.append(record).await
    }

    async fn record_attempt(
        &self,
        proxy_id: i32,
        success: bool,
        response_time_ms: i32,
    ) -> Result<()> {
        self.proxy_repo
            .record_attempt(proxy_id, success, response_time_ms)
            .await
    }

    async fn set_status(&self, proxy_id: i32, status: ProxyStatus) -> Result<()> {
        self.proxy_repo.set_status(proxy_id, status).await
    }

    async fn list_active(&self) -> Result<Vec<Proxy>> {
        self.proxy_repo.list_active().await
    }
}

/// Per-client-request dispatcher
pub struct Dispatcher {
    selector: Arc<DynamicSelector>,
    store: Arc<dyn AccountingStore>,
    settings_rx: watch::Receiver<RotationSettings>,
}

impl Dispatcher {
    pub fn new(
        selector: Arc<DynamicSelector>,
        store: Arc<dyn AccountingStore>,
        settings_rx: watch::Receiver<RotationSettings>,
    ) -> Self {
        Self {
            selector,
            store,
            settings_rx,
        }
    }

    /// Handle an incoming proxy request
    #[instrument(skip(self, req), fields(method = %req.method(), uri = %req.uri()))]
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        client_ip: String,
    ) -> Result<Response<Full<Bytes>>> {
        if req.method() == Method::CONNECT {
            return self.handle_connect(req, client_ip).await;
        }

        self.handle_http(req, client_ip).await
    }

    /// Handle a plain HTTP request (absolute-form URI)
    async fn handle_http(
        &self,
        req: Request<Incoming>,
        client_ip: String,
    ) -> Result<Response<Full<Bytes>>> {
        // Dispatches snapshot both once: an in-flight request never observes
        // a settings swap
        let settings = self.settings_rx.borrow().clone();
        let selector = self.selector.current();

        let method = req.method().clone();
        let uri = req.uri().clone();
        let (target_host, target_port) = ProxyTransport::parse_target(&uri)?;

        debug!(
            "Dispatching {} {} for {}",
            method, uri, client_ip
        );

        let (parts, body) = req.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| RotaError::InvalidRequest(format!("Failed to read body: {}", e)))?
            .to_bytes();

        let headers = sanitize_headers(&parts.headers);
        let url = uri.to_string();

        let overall = Duration::from_secs(settings.timeout as u64 * settings.retries as u64);
        timeout(
            overall,
            self.attempt_loop(
                selector,
                &settings,
                &method,
                &headers,
                body_bytes,
                &target_host,
                target_port,
                &uri,
                &url,
            ),
        )
        .await
        .unwrap_or(Err(RotaError::UpstreamTimeout))
    }

    /// The per-dispatch retry loop
    #[allow(clippy::too_many_arguments)]
    async fn attempt_loop(
        &self,
        selector: Arc<dyn ProxySelector>,
        settings: &RotationSettings,
        method: &Method,
        headers: &HeaderMap,
        body: Bytes,
        target_host: &str,
        target_port: u16,
        uri: &Uri,
        url: &str,
    ) -> Result<Response<Full<Bytes>>> {
        let per_attempt = Duration::from_secs(settings.timeout as u64);
        let mut excluded: HashSet<i32> = HashSet::new();
        let mut last_response: Option<Response<Full<Bytes>>> = None;
        let mut attempts = 0u32;

        while attempts < settings.retries {
            let proxy = match selector.select(&excluded).await {
                Ok(p) => p,
                Err(e) => {
                    // Selector exhausted: a 5xx we already hold beats
                    // surfacing the selector error to the client
                    if settings.fallback {
                        if let Some(resp) = last_response.take() {
                            return Ok(resp);
                        }
                    }
                    return Err(e);
                }
            };

            attempts += 1;
            let started = Instant::now();

            // If the dispatch future is dropped mid-attempt (client gone or
            // overall deadline), the guard still writes the attempt row
            let mut guard =
                AttemptGuard::arm(self.store.clone(), &proxy, method.as_str(), url);

            let outcome = timeout(
                per_attempt,
                self.forward(&proxy, method, headers, body.clone(), target_host, target_port, uri),
            )
            .await;

            guard.disarm();
            let elapsed_ms = started.elapsed().as_millis() as i32;

            match outcome {
                // Per-attempt deadline exceeded
                Err(_) => {
                    warn!(
                        proxy = %proxy.address,
                        attempt = attempts,
                        "Attempt timed out"
                    );
                    self.record_attempt(&proxy, method.as_str(), url, None, false, elapsed_ms)
                        .await;
                    if settings.remove_unhealthy {
                        self.demote(&proxy).await;
                    }
                    if !settings.fallback {
                        return Err(RotaError::UpstreamTimeout);
                    }
                    excluded.insert(proxy.id);
                }
                // Transport failure before a response line
                Ok(Err(e)) => {
                    warn!(
                        proxy = %proxy.address,
                        attempt = attempts,
                        error = %e,
                        "Attempt failed"
                    );
                    self.record_attempt(&proxy, method.as_str(), url, None, false, elapsed_ms)
                        .await;
                    if settings.remove_unhealthy {
                        self.demote(&proxy).await;
                    }
                    if !settings.fallback {
                        return Err(e);
                    }
                    excluded.insert(proxy.id);
                }
                Ok(Ok(response)) => {
                    let status = response.status();

                    if status.is_server_error() && settings.fallback {
                        debug!(
                            proxy = %proxy.address,
                            status = status.as_u16(),
                            attempt = attempts,
                            "Upstream 5xx, trying next"
                        );
                        self.record_attempt(
                            &proxy,
                            method.as_str(),
                            url,
                            Some(status.as_u16() as i32),
                            false,
                            elapsed_ms,
                        )
                        .await;
                        if settings.remove_unhealthy {
                            self.demote(&proxy).await;
                        }
                        excluded.insert(proxy.id);
                        last_response = Some(response);
                        continue;
                    }

                    let success = attempt_successful(status);
                    self.record_attempt(
                        &proxy,
                        method.as_str(),
                        url,
                        Some(status.as_u16() as i32),
                        success,
                        elapsed_ms,
                    )
                    .await;
                    if success {
                        selector.note_success(proxy.id);
                    }
                    return Ok(response);
                }
            }
        }

        if settings.fallback {
            if let Some(resp) = last_response.take() {
                return Ok(resp);
            }
        }
        Err(RotaError::Exhausted { attempts })
    }

    /// Handle CONNECT: pick an upstream, tunnel through it, answer 200 and
    /// blind-copy bytes after the upgrade
    async fn handle_connect(
        &self,
        req: Request<Incoming>,
        client_ip: String,
    ) -> Result<Response<Full<Bytes>>> {
        let settings = self.settings_rx.borrow().clone();
        let selector = self.selector.current();

        let uri = req.uri().clone();
        let authority = uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_else(|| uri.to_string());
        let (target_host, target_port) = ProxyTransport::parse_authority(&authority)?;

        debug!(
            "CONNECT request to {}:{} from {}",
            target_host, target_port, client_ip
        );

        let overall = Duration::from_secs(settings.timeout as u64 * settings.retries as u64);
        let upstream = timeout(
            overall,
            self.connect_loop(selector, &settings, &authority, &target_host, target_port),
        )
        .await
        .unwrap_or(Err(RotaError::UpstreamTimeout))?;

        // The client sees 200, then the connection upgrades into a raw
        // bidirectional byte pipe
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    if let Err(e) = TunnelHandler::run_upgraded(upgraded, upstream).await {
                        debug!("Tunnel ended: {}", e);
                    }
                }
                Err(e) => {
                    debug!("Upgrade failed: {}", e);
                }
            }
        });

        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::new()))
            .unwrap())
    }

    /// Retry loop for CONNECT tunnels
    async fn connect_loop(
        &self,
        selector: Arc<dyn ProxySelector>,
        settings: &RotationSettings,
        authority: &str,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        let per_attempt = Duration::from_secs(settings.timeout as u64);
        let mut excluded: HashSet<i32> = HashSet::new();
        let mut attempts = 0u32;

        while attempts < settings.retries {
            let proxy = selector.select(&excluded).await?;
            attempts += 1;
            let started = Instant::now();

            let mut guard = AttemptGuard::arm(
                self.store.clone(),
                &proxy,
                Method::CONNECT.as_str(),
                authority,
            );

            let outcome = timeout(
                per_attempt,
                ProxyTransport::connect(&proxy, target_host, target_port),
            )
            .await;

            guard.disarm();
            let elapsed_ms = started.elapsed().as_millis() as i32;

            match outcome {
                Ok(Ok(connection)) => {
                    debug!(
                        "CONNECT tunnel established through {} to {}:{}",
                        proxy.address, target_host, target_port
                    );
                    self.record_attempt(
                        &proxy,
                        Method::CONNECT.as_str(),
                        authority,
                        Some(StatusCode::OK.as_u16() as i32),
                        true,
                        elapsed_ms,
                    )
                    .await;
                    selector.note_success(proxy.id);
                    return Ok(connection);
                }
                Ok(Err(e)) => {
                    warn!(
                        proxy = %proxy.address,
                        attempt = attempts,
                        error = %e,
                        "CONNECT attempt failed"
                    );
                    self.record_attempt(
                        &proxy,
                        Method::CONNECT.as_str(),
                        authority,
                        None,
                        false,
                        elapsed_ms,
                    )
                    .await;
                    if settings.remove_unhealthy {
                        self.demote(&proxy).await;
                    }
                    if !settings.fallback {
                        return Err(e);
                    }
                    excluded.insert(proxy.id);
                }
                Err(_) => {
                    warn!(
                        proxy = %proxy.address,
                        attempt = attempts,
                        "CONNECT attempt timed out"
                    );
                    self.record_attempt(
                        &proxy,
                        Method::CONNECT.as_str(),
                        authority,
                        None,
                        false,
                        elapsed_ms,
                    )
                    .await;
                    if settings.remove_unhealthy {
                        self.demote(&proxy).await;
                    }
                    if !settings.fallback {
                        return Err(RotaError::UpstreamTimeout);
                    }
                    excluded.insert(proxy.id);
                }
            }
        }

        Err(RotaError::Exhausted { attempts })
    }

    /// Forward one attempt through the given upstream
    async fn forward(
        &self,
        proxy: &Proxy,
        method: &Method,
        headers: &HeaderMap,
        body: Bytes,
        target_host: &str,
        target_port: u16,
        uri: &Uri,
    ) -> Result<Response<Full<Bytes>>> {
        let protocol = proxy
            .protocol_enum()
            .ok_or_else(|| RotaError::UnsupportedProtocol(proxy.protocol.clone()))?;

        let (stream, request_uri): (Box<dyn ProxyConnection>, String) = if protocol.is_http() {
            // An HTTP proxy takes the plain request in absolute form
            let stream = TcpStream::connect(&proxy.address).await.map_err(|e| {
                RotaError::UpstreamConnect(format!("Connect failed: {}", e))
            })?;
            (Box::new(stream), absolute_form(target_host, target_port, uri))
        } else {
            // SOCKS tunnels to the origin; speak origin-form over the tunnel
            let stream = ProxyTransport::connect(proxy, target_host, target_port).await?;
            (stream, origin_form(uri))
        };

        let mut builder = Request::builder().method(method.clone()).uri(&request_uri);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if !headers.contains_key(header::HOST) {
            builder = builder.header(header::HOST, host_header_value(target_host, target_port));
        }

        let request = builder
            .body(Full::new(body))
            .map_err(|e| RotaError::InvalidRequest(format!("Failed to build request: {}", e)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RotaError::UpstreamConnect(format!("Handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection ended: {}", e);
            }
        });

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| RotaError::UpstreamConnect(format!("Request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body_bytes = body
            .collect()
            .await
            .map_err(|e| RotaError::UpstreamConnect(format!("Failed to read response: {}", e)))?
            .to_bytes();

        Ok(Response::from_parts(parts, Full::new(body_bytes)))
    }

    /// Write the attempt row and bump the proxy counters.
    ///
    /// The append completes before the caller's next select, which keeps a
    /// refreshing selector from re-picking the just-failed upstream. Write
    /// failures are logged and swallowed: accounting never fails a dispatch.
    async fn record_attempt(
        &self,
        proxy: &Proxy,
        method: &str,
        url: &str,
        status_code: Option<i32>,
        success: bool,
        response_time_ms: i32,
    ) {
        let record = RequestRecord::new(
            proxy.id,
            &proxy.address,
            method,
            url,
            status_code,
            success,
            response_time_ms,
        );

        if let Err(e) = self.store.append(&record).await {
            warn!(error = %e, "Failed to append request record");
        }
        if let Err(e) = self
            .store
            .record_attempt(proxy.id, success, response_time_ms)
            .await
        {
            warn!(error = %e, "Failed to update proxy counters");
        }
    }

    /// Demote an upstream to unhealthy and push the shrunken active list
    /// into the selector
    async fn demote(&self, proxy: &Proxy) {
        if let Err(e) = self
            .store
            .set_status(proxy.id, ProxyStatus::Unhealthy)
            .await
        {
            warn!(proxy = %proxy.address, error = %e, "Failed to mark proxy unhealthy");
            return;
        }

        debug!(proxy = %proxy.address, "Marked proxy unhealthy");

        match self.store.list_active().await {
            Ok(proxies) => {
                if let Err(e) = self.selector.refresh(proxies).await {
                    warn!(error = %e, "Failed to refresh selector");
                }
            }
            Err(e) => warn!(error = %e, "Failed to reload active proxies"),
        }
    }
}

/// Records a failed attempt row if the dispatch future is dropped mid-flight
/// (client disconnect or overall deadline). Disarmed once the attempt
/// resolves normally.
struct AttemptGuard {
    store: Arc<dyn AccountingStore>,
    record: Option<RequestRecord>,
}

impl AttemptGuard {
    fn arm(store: Arc<dyn AccountingStore>, proxy: &Proxy, method: &str, url: &str) -> Self {
        Self {
            store,
            record: Some(RequestRecord::new(
                proxy.id,
                &proxy.address,
                method,
                url,
                None,
                false,
                0,
            )),
        }
    }

    fn disarm(&mut self) {
        self.record = None;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            let store = self.store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.append(&record).await {
                    warn!(error = %e, "Failed to append cancelled attempt record");
                }
                if let Err(e) = store.record_attempt(record.proxy_id, false, 0).await {
                    warn!(error = %e, "Failed to update proxy counters for cancelled attempt");
                }
            });
        }
    }
}

/// Success means the upstream answered in the 200-399 range
pub(crate) fn attempt_successful(status: StatusCode) -> bool {
    let code = status.as_u16();
    (200..400).contains(&code)
}

/// Strip hop-by-hop and `Proxy-*` request headers, then append `Via`.
/// Client identity headers are never added.
pub(crate) fn sanitize_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();

    for (name, value) in headers {
        if is_hop_by_hop_header(name.as_str()) || name.as_str().starts_with("proxy-") {
            continue;
        }
        out.append(name, value.clone());
    }

    out.append(header::VIA, HeaderValue::from_static("1.1 rota"));
    out
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Absolute-form request target for an HTTP upstream proxy
pub(crate) fn absolute_form(target_host: &str, target_port: u16, uri: &Uri) -> String {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    if target_port == 80 {
        format!("http://{}{}", target_host, path)
    } else {
        format!("http://{}:{}{}", target_host, target_port, path)
    }
}

/// Origin-form request target for a tunneled (SOCKS) upstream
pub(crate) fn origin_form(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Host header for origin-form requests; standard port is omitted
fn host_header_value(target_host: &str, target_port: u16) -> String {
    if target_port == 80 {
        target_host.to_string()
    } else {
        format!("{}:{}", target_host, target_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::rotation::testing::test_proxy;
    use crate::proxy::rotation::LeastConnectionsSelector;
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// In-memory accounting store for exercising the retry loop
    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<RequestRecord>>,
        demoted: Mutex<Vec<i32>>,
        active: Mutex<Vec<Proxy>>,
    }

    #[async_trait]
    impl AccountingStore for MemoryStore {
        async fn append(&self, record: &RequestRecord) -> Result<()> {
            self.records.lock().push(record.clone());
            Ok(())
        }

        async fn record_attempt(
            &self,
            _proxy_id: i32,
            _success: bool,
            _response_time_ms: i32,
        ) -> Result<()> {
            Ok(())
        }

        async fn set_status(&self, proxy_id: i32, status: ProxyStatus) -> Result<()> {
            if status == ProxyStatus::Unhealthy {
                self.demoted.lock().push(proxy_id);
                self.active.lock().retain(|p| p.id != proxy_id);
            }
            Ok(())
        }

        async fn list_active(&self) -> Result<Vec<Proxy>> {
            Ok(self.active.lock().clone())
        }
    }

    /// Fake upstream HTTP proxy answering every plain request with a canned
    /// response
    async fn fake_upstream(status_line: &'static str, body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 2048];
                    let _ = stream.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        body.len(),
                        body,
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
        });

        addr
    }

    /// Fake upstream proxy acknowledging CONNECT
    async fn fake_connect_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 2048];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                        .await;
                    // Hold the tunnel open until the peer goes away
                    let _ = stream.read(&mut buf).await;
                });
            }
        });

        addr
    }

    /// Address with nothing listening on it
    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn proxy_at(id: i32, addr: SocketAddr) -> Proxy {
        test_proxy(id, &addr.to_string())
    }

    /// Dispatcher wired to an in-memory store and a deterministic
    /// (lowest-id-first) selector over the given pool
    async fn dispatch_setup(
        proxies: Vec<Proxy>,
        settings: RotationSettings,
    ) -> (Dispatcher, Arc<MemoryStore>, Arc<dyn ProxySelector>) {
        let store = Arc::new(MemoryStore::default());
        *store.active.lock() = proxies.clone();

        let dynamic = Arc::new(DynamicSelector::new(Arc::new(
            LeastConnectionsSelector::new(),
        )));
        dynamic.refresh(proxies).await.unwrap();
        let snapshot = dynamic.current();

        let (_settings_tx, settings_rx) = watch::channel(settings);
        let dispatcher = Dispatcher::new(dynamic, store.clone(), settings_rx);

        (dispatcher, store, snapshot)
    }

    fn s5_settings() -> RotationSettings {
        RotationSettings {
            remove_unhealthy: true,
            fallback: true,
            timeout: 5,
            retries: 3,
            ..RotationSettings::default()
        }
    }

    #[tokio::test]
    async fn test_attempt_loop_falls_through_5xx_to_success() {
        // Three upstreams: the first two answer 502, the third succeeds
        let bad_one = fake_upstream("502 Bad Gateway", "").await;
        let bad_two = fake_upstream("502 Bad Gateway", "").await;
        let good = fake_upstream("200 OK", "ok").await;

        let settings = s5_settings();
        let proxies = vec![
            proxy_at(1, bad_one),
            proxy_at(2, bad_two),
            proxy_at(3, good),
        ];
        let (dispatcher, store, selector) = dispatch_setup(proxies, settings.clone()).await;

        let uri: Uri = "http://example.com/".parse().unwrap();
        let headers = sanitize_headers(&HeaderMap::new());

        let response = dispatcher
            .attempt_loop(
                selector,
                &settings,
                &Method::GET,
                &headers,
                Bytes::new(),
                "example.com",
                80,
                &uri,
                "http://example.com/",
            )
            .await
            .unwrap();

        // The client receives the third upstream's response
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");

        // One row per attempt, each against a distinct upstream
        let records = store.records.lock().clone();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.proxy_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        assert_eq!(records[0].status_code, Some(502));
        assert!(!records[0].success);
        assert_eq!(records[1].status_code, Some(502));
        assert!(!records[1].success);
        assert_eq!(records[2].status_code, Some(200));
        assert!(records[2].success);

        // Both 502 upstreams were retired
        assert_eq!(store.demoted.lock().clone(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_attempt_loop_exhaustion_returns_last_5xx() {
        let bad_one = fake_upstream("502 Bad Gateway", "").await;
        let bad_two = fake_upstream("503 Service Unavailable", "").await;

        let settings = RotationSettings {
            remove_unhealthy: false,
            fallback: true,
            timeout: 5,
            retries: 2,
            ..RotationSettings::default()
        };
        let proxies = vec![proxy_at(1, bad_one), proxy_at(2, bad_two)];
        let (dispatcher, store, selector) = dispatch_setup(proxies, settings.clone()).await;

        let uri: Uri = "http://example.com/".parse().unwrap();
        let headers = sanitize_headers(&HeaderMap::new());

        let response = dispatcher
            .attempt_loop(
                selector,
                &settings,
                &Method::GET,
                &headers,
                Bytes::new(),
                "example.com",
                80,
                &uri,
                "http://example.com/",
            )
            .await
            .unwrap();

        // Every upstream was attempted; the client gets the last 5xx rather
        // than a synthetic error
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let records = store.records.lock().clone();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records.iter().map(|r| r.proxy_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(records.iter().all(|r| !r.success));

        // remove_unhealthy was off: nobody was retired
        assert!(store.demoted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_loop_without_fallback_returns_5xx_directly() {
        let bad = fake_upstream("500 Internal Server Error", "boom").await;
        let unused = fake_upstream("200 OK", "ok").await;

        let settings = RotationSettings {
            remove_unhealthy: false,
            fallback: false,
            timeout: 5,
            retries: 3,
            ..RotationSettings::default()
        };
        let proxies = vec![proxy_at(1, bad), proxy_at(2, unused)];
        let (dispatcher, store, selector) = dispatch_setup(proxies, settings.clone()).await;

        let uri: Uri = "http://example.com/".parse().unwrap();
        let headers = sanitize_headers(&HeaderMap::new());

        let response = dispatcher
            .attempt_loop(
                selector,
                &settings,
                &Method::GET,
                &headers,
                Bytes::new(),
                "example.com",
                80,
                &uri,
                "http://example.com/",
            )
            .await
            .unwrap();

        // With fallback off the first response goes back as-is
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let records = store.records.lock().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].proxy_id, 1);
        assert_eq!(records[0].status_code, Some(500));
        assert!(!records[0].success);
    }

    #[tokio::test]
    async fn test_connect_loop_retries_unreachable_upstream() {
        // First upstream refuses the connection, second acknowledges CONNECT
        let dead = dead_addr().await;
        let alive = fake_connect_upstream().await;

        let settings = s5_settings();
        let proxies = vec![proxy_at(1, dead), proxy_at(2, alive)];
        let (dispatcher, store, selector) = dispatch_setup(proxies, settings.clone()).await;

        let connection = dispatcher
            .connect_loop(
                selector,
                &settings,
                "example.com:443",
                "example.com",
                443,
            )
            .await;
        assert!(connection.is_ok());

        let records = store.records.lock().clone();
        assert_eq!(records.len(), 2);

        // Unreachable upstream: failed row with no status code, then retired
        assert_eq!(records[0].proxy_id, 1);
        assert_eq!(records[0].status_code, None);
        assert!(!records[0].success);
        assert_eq!(records[0].method, "CONNECT");

        // Established tunnel: one success row with the handshake status
        assert_eq!(records[1].proxy_id, 2);
        assert_eq!(records[1].status_code, Some(200));
        assert!(records[1].success);

        assert_eq!(store.demoted.lock().clone(), vec![1]);
    }

    #[test]
    fn test_attempt_successful_range() {
        assert!(attempt_successful(StatusCode::OK));
        assert!(attempt_successful(StatusCode::CREATED));
        assert!(attempt_successful(StatusCode::FOUND));

        assert!(!attempt_successful(StatusCode::NOT_FOUND));
        assert!(!attempt_successful(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!attempt_successful(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn test_sanitize_headers_strips_proxy_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert(
            "proxy-authorization",
            HeaderValue::from_static("Basic Zm9vOmJhcg=="),
        );
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("x-custom", HeaderValue::from_static("keep-me"));

        let sanitized = sanitize_headers(&headers);

        assert!(sanitized.contains_key("accept"));
        assert!(sanitized.contains_key("x-custom"));
        assert!(!sanitized.contains_key("connection"));
        assert!(!sanitized.contains_key("proxy-authorization"));
        assert!(!sanitized.contains_key("proxy-connection"));
        assert!(!sanitized.contains_key("transfer-encoding"));
    }

    #[test]
    fn test_sanitize_headers_appends_via() {
        let headers = HeaderMap::new();
        let sanitized = sanitize_headers(&headers);
        assert_eq!(
            sanitized.get(header::VIA).map(|v| v.to_str().unwrap()),
            Some("1.1 rota")
        );

        // An existing Via survives; ours is appended after it
        let mut headers = HeaderMap::new();
        headers.insert(header::VIA, HeaderValue::from_static("1.1 upstream-hop"));
        let sanitized = sanitize_headers(&headers);
        let values: Vec<_> = sanitized
            .get_all(header::VIA)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, vec!["1.1 upstream-hop", "1.1 rota"]);
    }

    #[test]
    fn test_sanitize_headers_never_adds_client_identity() {
        let headers = HeaderMap::new();
        let sanitized = sanitize_headers(&headers);
        assert!(!sanitized.contains_key("x-forwarded-for"));
        assert!(!sanitized.contains_key("forwarded"));
    }

    #[test]
    fn test_absolute_form() {
        let uri: Uri = "http://example.com/a/b?q=1".parse().unwrap();
        assert_eq!(
            absolute_form("example.com", 80, &uri),
            "http://example.com/a/b?q=1"
        );
        assert_eq!(
            absolute_form("example.com", 8080, &uri),
            "http://example.com:8080/a/b?q=1"
        );
    }

    #[test]
    fn test_origin_form() {
        let uri: Uri = "http://example.com/a/b?q=1".parse().unwrap();
        assert_eq!(origin_form(&uri), "/a/b?q=1");

        let uri: Uri = "http://example.com".parse().unwrap();
        assert_eq!(origin_form(&uri), "/");
    }

    #[test]
    fn test_host_header_value() {
        assert_eq!(host_header_value("example.com", 80), "example.com");
        assert_eq!(host_header_value("example.com", 8080), "example.com:8080");
    }
}
