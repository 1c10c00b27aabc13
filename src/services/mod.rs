//! Background services

pub mod settings_watcher;

pub use settings_watcher::{SettingsWatcher, SettingsWatcherConfig, SettingsWatcherHandle};
