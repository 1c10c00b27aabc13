//! Ingress proxy server
//!
//! Terminates plain HTTP and CONNECT on the configured port and hands every
//! request to the dispatcher. Each client connection runs as its own task.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

use crate::config::ProxyServerConfig;
use crate::error::Result;
use crate::proxy::dispatcher::Dispatcher;

/// Ingress proxy server
pub struct ProxyServer {
    config: ProxyServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl ProxyServer {
    /// Create a new ingress server
    pub fn new(config: ProxyServerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Run the ingress server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                crate::error::RotaError::InvalidConfig("Invalid proxy server address".into())
            })?;

        let listener = TcpListener::bind(addr).await?;
        info!("Proxy server listening on {}", addr);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let dispatcher = self.dispatcher.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(
                                    stream,
                                    client_addr,
                                    dispatcher,
                                ).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single client connection
    async fn handle_connection(
        stream: tokio::net::TcpStream,
        client_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<()> {
        let io = TokioIo::new(stream);
        let client_ip = client_addr.ip().to_string();

        let service = service_fn(move |req: Request<Incoming>| {
            let dispatcher = dispatcher.clone();
            let client_ip = client_ip.clone();

            async move {
                match dispatcher.handle(req, client_ip).await {
                    Ok(response) => Ok::<_, Infallible>(response),
                    Err(e) => {
                        debug!("Dispatch failed: {}", e);
                        Ok(error_response(&e))
                    }
                }
            }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
            .map_err(|e| crate::error::RotaError::Http(e.to_string()))?;

        Ok(())
    }
}

/// Translate a dispatch error into the client-visible response
fn error_response(err: &crate::error::RotaError) -> Response<Full<Bytes>> {
    Response::builder()
        .status(err.status_code())
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(err.to_string())))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RotaError;

    #[test]
    fn test_error_response_maps_selector_errors() {
        let resp = error_response(&RotaError::AllAtLimit);
        assert_eq!(resp.status(), hyper::StatusCode::SERVICE_UNAVAILABLE);

        let resp = error_response(&RotaError::NoUpstreams);
        assert_eq!(resp.status(), hyper::StatusCode::SERVICE_UNAVAILABLE);

        let resp = error_response(&RotaError::Exhausted { attempts: 3 });
        assert_eq!(resp.status(), hyper::StatusCode::BAD_GATEWAY);

        let resp = error_response(&RotaError::UpstreamTimeout);
        assert_eq!(resp.status(), hyper::StatusCode::GATEWAY_TIMEOUT);
    }
}
