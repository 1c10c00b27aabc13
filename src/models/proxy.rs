use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Proxy protocol type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks5" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, ProxyProtocol::Socks4 | ProxyProtocol::Socks5)
    }

    pub fn is_http(&self) -> bool {
        matches!(self, ProxyProtocol::Http | ProxyProtocol::Https)
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    #[default]
    Active,
    Unhealthy,
    Disabled,
}

impl ProxyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStatus::Active => "active",
            ProxyStatus::Unhealthy => "unhealthy",
            ProxyStatus::Disabled => "disabled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(ProxyStatus::Active),
            "unhealthy" => Some(ProxyStatus::Unhealthy),
            "disabled" => Some(ProxyStatus::Disabled),
            _ => None,
        }
    }

    /// Only active proxies participate in rotation
    pub fn is_selectable(&self) -> bool {
        matches!(self, ProxyStatus::Active)
    }
}

impl std::fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Upstream proxy entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Proxy {
    pub id: i32,
    pub address: String,
    pub protocol: String, // Stored as string in DB
    pub status: String,   // Stored as string in DB
    pub requests: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub avg_response_time: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proxy {
    /// Get the protocol enum
    pub fn protocol_enum(&self) -> Option<ProxyProtocol> {
        ProxyProtocol::from_str(&self.protocol)
    }

    /// Get the status enum
    pub fn status_enum(&self) -> Option<ProxyStatus> {
        ProxyStatus::from_str(&self.status)
    }

    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.requests as f64) * 100.0
        }
    }

    /// Check if the proxy participates in rotation
    pub fn is_selectable(&self) -> bool {
        self.status_enum()
            .map(|s| s.is_selectable())
            .unwrap_or(false)
    }
}

/// Proxy with calculated statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyWithStats {
    #[serde(flatten)]
    pub proxy: Proxy,
    pub success_rate: f64,
}

impl From<Proxy> for ProxyWithStats {
    fn from(proxy: Proxy) -> Self {
        let success_rate = proxy.success_rate();
        ProxyWithStats {
            proxy,
            success_rate,
        }
    }
}

/// Request to create a new proxy
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProxyRequest {
    pub address: String,
    pub protocol: String,
}

impl CreateProxyRequest {
    /// Validate address (`host:port`) and protocol
    pub fn validate(&self) -> crate::error::Result<()> {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .ok_or_else(|| crate::error::RotaError::InvalidProxyAddress(self.address.clone()))?;

        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(crate::error::RotaError::InvalidProxyAddress(
                self.address.clone(),
            ));
        }

        if ProxyProtocol::from_str(&self.protocol).is_none() {
            return Err(crate::error::RotaError::UnsupportedProtocol(
                self.protocol.clone(),
            ));
        }

        Ok(())
    }
}

/// Proxy list query parameters
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProxyListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub protocol: Option<String>,
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, limit: i64) -> Self {
        let total_pages = (total as f64 / limit as f64).ceil() as i64;
        PaginatedResponse {
            data,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_proxy() -> Proxy {
        Proxy {
            id: 1,
            address: "127.0.0.1:8080".to_string(),
            protocol: "http".to_string(),
            status: "active".to_string(),
            requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_time: 0,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_proxy_protocol_parsing_and_helpers() {
        assert_eq!(ProxyProtocol::from_str("HTTP"), Some(ProxyProtocol::Http));
        assert_eq!(ProxyProtocol::from_str("https"), Some(ProxyProtocol::Https));
        assert_eq!(
            ProxyProtocol::from_str("SOCKS4"),
            Some(ProxyProtocol::Socks4)
        );
        assert_eq!(ProxyProtocol::from_str("unknown"), None);

        assert!(ProxyProtocol::Socks5.is_socks());
        assert!(!ProxyProtocol::Https.is_socks());
        assert!(ProxyProtocol::Https.is_http());
        assert!(!ProxyProtocol::Socks4.is_http());

        assert_eq!(ProxyProtocol::Socks4.to_string(), "socks4");
    }

    #[test]
    fn test_proxy_status_parsing_and_is_selectable() {
        assert_eq!(ProxyStatus::from_str("active"), Some(ProxyStatus::Active));
        assert_eq!(
            ProxyStatus::from_str("UNHEALTHY"),
            Some(ProxyStatus::Unhealthy)
        );
        assert_eq!(
            ProxyStatus::from_str("disabled"),
            Some(ProxyStatus::Disabled)
        );
        assert_eq!(ProxyStatus::from_str("unknown"), None);

        assert!(ProxyStatus::Active.is_selectable());
        assert!(!ProxyStatus::Unhealthy.is_selectable());
        assert!(!ProxyStatus::Disabled.is_selectable());

        assert_eq!(ProxyStatus::Unhealthy.to_string(), "unhealthy");
    }

    #[test]
    fn test_proxy_success_rate_and_is_selectable() {
        let mut proxy = base_proxy();
        assert_eq!(proxy.success_rate(), 0.0);
        assert!(proxy.is_selectable());

        proxy.requests = 10;
        proxy.successful_requests = 7;
        assert!((proxy.success_rate() - 70.0).abs() < 1e-9);

        proxy.status = "unhealthy".to_string();
        assert!(!proxy.is_selectable());

        proxy.status = "bogus".to_string();
        assert!(!proxy.is_selectable());
    }

    #[test]
    fn test_create_proxy_request_validation() {
        let req = CreateProxyRequest {
            address: "1.2.3.4:8080".to_string(),
            protocol: "http".to_string(),
        };
        assert!(req.validate().is_ok());

        let req = CreateProxyRequest {
            address: "1.2.3.4".to_string(),
            protocol: "http".to_string(),
        };
        assert!(req.validate().is_err());

        let req = CreateProxyRequest {
            address: "1.2.3.4:99999".to_string(),
            protocol: "http".to_string(),
        };
        assert!(req.validate().is_err());

        let req = CreateProxyRequest {
            address: "1.2.3.4:8080".to_string(),
            protocol: "gopher".to_string(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_paginated_response_total_pages() {
        let resp = PaginatedResponse::new(vec![1, 2, 3], 0, 1, 10);
        assert_eq!(resp.total_pages, 0);

        let resp = PaginatedResponse::new(vec![1], 1, 1, 10);
        assert_eq!(resp.total_pages, 1);

        let resp = PaginatedResponse::new(vec![1; 10], 11, 1, 10);
        assert_eq!(resp.total_pages, 2);
    }
}
