use log::{error, info, warn};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use super::SecurityConfig;
use crate::error::ConfigError;

/// Invoked with each successfully reloaded configuration.
pub type ConfigChangeCallback = Box<dyn Fn(SecurityConfig) + Send + Sync>;

const DEBOUNCE: Duration = Duration::from_secs(2);

/// Watches the configuration file and hands fresh configs to a callback.
///
/// A file that fails to parse is logged and ignored; the previous
/// configuration stays in force.
pub struct ConfigWatcher {
    config_path: String,
    watcher: Option<RecommendedWatcher>,
}

impl ConfigWatcher {
    pub fn new(config_path: &str) -> Self {
        Self {
            config_path: config_path.to_string(),
            watcher: None,
        }
    }

    pub fn start_watching(&mut self, callback: ConfigChangeCallback) -> Result<(), ConfigError> {
        let (notify_tx, notify_rx) = mpsc::channel::<Result<Event, notify::Error>>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default().with_poll_interval(DEBOUNCE),
        )?;
        watcher.watch(Path::new(&self.config_path), RecursiveMode::NonRecursive)?;
        self.watcher = Some(watcher);

        let config_path = self.config_path.clone();
        thread::spawn(move || {
            let mut last_reload: Option<Instant> = None;

            loop {
                match notify_rx.recv_timeout(Duration::from_secs(5)) {
                    Ok(Ok(event)) => {
                        if !(event.kind.is_modify() || event.kind.is_create()) {
                            continue;
                        }
                        if last_reload.is_some_and(|at| at.elapsed() < DEBOUNCE) {
                            continue;
                        }

                        // let the writer finish
                        thread::sleep(Duration::from_millis(100));

                        match reload_config(&config_path) {
                            Ok(new_config) => {
                                callback(new_config);
                                last_reload = Some(Instant::now());
                            }
                            Err(e) => {
                                error!("Failed to reload configuration: {}", e);
                                warn!("Keeping previous configuration");
                            }
                        }
                    }
                    Ok(Err(e)) => error!("File watch error: {}", e),
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        info!("Config watcher channel disconnected");
                        break;
                    }
                }
            }
        });

        info!("Started watching configuration file: {}", self.config_path);
        Ok(())
    }

    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    pub fn is_enabled(&self) -> bool {
        self.watcher.is_some()
    }
}

pub fn reload_config(path: &str) -> Result<SecurityConfig, ConfigError> {
    info!("Reloading configuration from: {}", path);
    let config = SecurityConfig::from_file(path)?;
    info!("Configuration reloaded successfully");
    Ok(config)
}
