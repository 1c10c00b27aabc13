//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Handles establishing connections through upstream proxies.

use hyper::Uri;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};

use crate::error::{Result, RotaError};
use crate::models::{Proxy, ProxyProtocol};

/// Proxy transport handler
///
/// Manages connections through the supported upstream protocols
pub struct ProxyTransport;

impl ProxyTransport {
    /// Open a tunnel to `target_host:target_port` through the given upstream
    #[instrument(skip(proxy), fields(proxy_id = proxy.id, target = %target_host))]
    pub async fn connect(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        let protocol = proxy
            .protocol_enum()
            .ok_or_else(|| RotaError::UnsupportedProtocol(proxy.protocol.clone()))?;

        match protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => {
                Self::connect_http(proxy, target_host, target_port).await
            }
            ProxyProtocol::Socks4 => Self::connect_socks4(proxy, target_host, target_port).await,
            ProxyProtocol::Socks5 => Self::connect_socks5(proxy, target_host, target_port).await,
        }
    }

    /// Connect through HTTP CONNECT method
    async fn connect_http(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        debug!("Connecting to HTTP proxy at {}", proxy.address);

        let stream = TcpStream::connect(&proxy.address)
            .await
            .map_err(|e| RotaError::UpstreamConnect(format!("TCP connect failed: {}", e)))?;

        let connect_request = Self::build_connect_request(target_host, target_port);

        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut stream = stream;
        stream
            .write_all(connect_request.as_bytes())
            .await
            .map_err(|e| RotaError::UpstreamConnect(format!("Failed to send CONNECT: {}", e)))?;

        // Read response head
        let mut response = vec![0u8; 1024];
        let n = stream.read(&mut response).await.map_err(|e| {
            RotaError::UpstreamConnect(format!("Failed to read CONNECT response: {}", e))
        })?;

        let response_str = String::from_utf8_lossy(&response[..n]);
        if !response_str.starts_with("HTTP/1.1 200") && !response_str.starts_with("HTTP/1.0 200") {
            return Err(RotaError::UpstreamConnect(format!(
                "CONNECT failed: {}",
                response_str.lines().next().unwrap_or("Unknown error")
            )));
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(Box::new(TunnelConnection(stream)))
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(target_host: &str, target_port: u16) -> String {
        format!(
            "CONNECT {}:{} HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
            target_host, target_port, target_host, target_port
        )
    }

    /// Connect through SOCKS4 proxy
    async fn connect_socks4(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        debug!("Connecting to SOCKS4 proxy at {}", proxy.address);

        // SOCKS4 carries an IPv4 address on the wire, not a hostname
        let target_ip: std::net::Ipv4Addr = target_host.parse().map_err(|_| {
            RotaError::UpstreamConnect(
                "SOCKS4 requires an IP target; use SOCKS5 for DNS resolution".to_string(),
            )
        })?;

        let target = std::net::SocketAddrV4::new(target_ip, target_port);

        let stream = Socks4Stream::connect(proxy.address.as_str(), target)
            .await
            .map_err(|e| RotaError::UpstreamConnect(format!("SOCKS4 connect failed: {}", e)))?;

        debug!("SOCKS4 connection established");
        Ok(Box::new(TunnelConnection(stream.into_inner())))
    }

    /// Connect through SOCKS5 proxy
    async fn connect_socks5(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        debug!("Connecting to SOCKS5 proxy at {}", proxy.address);

        let stream = Socks5Stream::connect(proxy.address.as_str(), (target_host, target_port))
            .await
            .map_err(|e| RotaError::UpstreamConnect(format!("SOCKS5 connect failed: {}", e)))?;

        debug!("SOCKS5 connection established");
        Ok(Box::new(TunnelConnection(stream.into_inner())))
    }

    /// Parse host and port from a URI
    pub fn parse_target(uri: &Uri) -> Result<(String, u16)> {
        let host = uri
            .host()
            .ok_or_else(|| RotaError::InvalidRequest("Missing host in URI".to_string()))?
            .to_string();

        let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });

        Ok((host, port))
    }

    /// Parse host and port from authority (for CONNECT requests)
    pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
        if let Some((host, port_str)) = authority.rsplit_once(':') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| RotaError::InvalidRequest("Invalid port".to_string()))?;
            Ok((host.to_string(), port))
        } else {
            // Default to port 443 for CONNECT (typically HTTPS)
            Ok((authority.to_string(), 443))
        }
    }
}

/// Trait for proxied connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// A raw TCP connection to an HTTP proxy counts too: plain requests are sent
// to it in absolute form without a CONNECT handshake
impl ProxyConnection for TcpStream {}

/// TCP stream behind an established tunnel (HTTP CONNECT or SOCKS handshake)
struct TunnelConnection(TcpStream);

impl AsyncRead for TunnelConnection {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelConnection {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

impl ProxyConnection for TunnelConnection {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target_defaults_by_scheme() {
        let uri: Uri = "http://example.com/path".parse().unwrap();
        assert_eq!(
            ProxyTransport::parse_target(&uri).unwrap(),
            ("example.com".to_string(), 80)
        );

        let uri: Uri = "https://example.com/".parse().unwrap();
        assert_eq!(
            ProxyTransport::parse_target(&uri).unwrap(),
            ("example.com".to_string(), 443)
        );

        let uri: Uri = "http://example.com:8080/".parse().unwrap();
        assert_eq!(
            ProxyTransport::parse_target(&uri).unwrap(),
            ("example.com".to_string(), 8080)
        );
    }

    #[test]
    fn test_parse_target_requires_host() {
        let uri: Uri = "/relative/path".parse().unwrap();
        assert!(ProxyTransport::parse_target(&uri).is_err());
    }

    #[test]
    fn test_parse_authority() {
        assert_eq!(
            ProxyTransport::parse_authority("example.com:443").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            ProxyTransport::parse_authority("example.com").unwrap(),
            ("example.com".to_string(), 443)
        );
        assert!(ProxyTransport::parse_authority("example.com:notaport").is_err());
    }

    #[test]
    fn test_build_connect_request_shape() {
        let req = ProxyTransport::build_connect_request("example.com", 443);
        assert!(req.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(req.contains("Host: example.com:443\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }
}
