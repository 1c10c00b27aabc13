pub mod dashboard;
pub mod proxy;
pub mod request_log;
pub mod settings;

pub use dashboard::DashboardRepository;
pub use proxy::ProxyRepository;
pub use request_log::RequestLogRepository;
pub use settings::SettingsRepository;
