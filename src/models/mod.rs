pub mod dashboard;
pub mod proxy;
pub mod request;
pub mod settings;

pub use dashboard::DashboardStats;
pub use proxy::{
    CreateProxyRequest, PaginatedResponse, Proxy, ProxyListParams, ProxyProtocol, ProxyStatus,
    ProxyWithStats,
};
pub use request::{ProxyRequest, RequestListParams, RequestRecord};
pub use settings::{keys, RateLimitedSettings, RotationMethod, RotationSettings, SettingsRecord};
