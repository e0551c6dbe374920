use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::net::Scope;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the application is served from (e.g. "https://presupuesto.example")
  pub origin: Url,
  /// Path scope under the origin; requests outside it are not intercepted
  #[serde(default = "default_base_path")]
  pub base_path: String,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  /// Where the database and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache names are `<prefix><version>`
  #[serde(default = "default_cache_prefix")]
  pub prefix: String,
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Application shell, relative to the scope
  #[serde(default = "default_shell")]
  pub shell: Vec<String>,
  /// Activate right after a successful install instead of waiting
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_cache_prefix(),
      version: default_cache_version(),
      shell: default_shell(),
      skip_waiting: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// Type tag for queued payloads without a `type` field
  #[serde(default = "default_entry_type")]
  pub default_type: String,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      default_type: default_entry_type(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
  /// Remote endpoint queued mutations are POSTed to. Without one, flushing
  /// only marks entries as synced.
  pub endpoint: Option<Url>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
  #[serde(default = "default_notification_title")]
  pub default_title: String,
  #[serde(default = "default_notification_body")]
  pub default_body: String,
  /// Icon path relative to the scope
  #[serde(default = "default_notification_icon")]
  pub icon: String,
  /// Route opened on click when no window is open, relative to the scope
  #[serde(default = "default_click_route")]
  pub click_route: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      default_title: default_notification_title(),
      default_body: default_notification_body(),
      icon: default_notification_icon(),
      click_route: default_click_route(),
    }
  }
}

fn default_base_path() -> String {
  "/".to_string()
}

fn default_cache_prefix() -> String {
  "presupuesto-cache-".to_string()
}

fn default_cache_version() -> String {
  "v1".to_string()
}

fn default_shell() -> Vec<String> {
  [
    "./",
    "./index.html",
    "./manifest.webmanifest",
    "./icons/icon-192.svg",
    "./icons/icon-512.svg",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_true() -> bool {
  true
}

fn default_entry_type() -> String {
  "movimiento".to_string()
}

fn default_notification_title() -> String {
  "Recordatorio de suscripción".to_string()
}

fn default_notification_body() -> String {
  "Revisa tus próximas renovaciones".to_string()
}

fn default_notification_icon() -> String {
  "./icons/icon-192.svg".to_string()
}

fn default_click_route() -> String {
  "./suscripciones".to_string()
}

impl Config {
  /// Minimal configuration for an origin, everything else defaulted.
  #[cfg(test)]
  pub fn for_origin(origin: Url) -> Self {
    Self {
      origin,
      base_path: default_base_path(),
      cache: CacheConfig::default(),
      queue: QueueConfig::default(),
      sync: SyncConfig::default(),
      notifications: NotificationsConfig::default(),
      data_dir: None,
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./presupuesto-sw.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/presupuesto-sw/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/presupuesto-sw/config.yaml\n\
                 with at least an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("presupuesto-sw.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("presupuesto-sw").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.scope()?;
    Ok(config)
  }

  /// Origin plus base path.
  pub fn scope(&self) -> Result<Scope> {
    let root = self
      .origin
      .join(&self.base_path)
      .map_err(|e| eyre!("Invalid base_path '{}': {}", self.base_path, e))?;
    if root.origin() != self.origin.origin() {
      return Err(eyre!(
        "base_path '{}' leaves the origin {}",
        self.base_path,
        self.origin
      ));
    }
    Ok(Scope::new(root))
  }

  /// Application shell URLs resolved against the scope.
  pub fn shell_urls(&self) -> Result<Vec<Url>> {
    let scope = self.scope()?;
    self.cache.shell.iter().map(|p| scope.resolve(p)).collect()
  }

  /// The shell document served to offline navigations.
  pub fn shell_index(&self) -> Result<Url> {
    self.scope()?.resolve("./index.html")
  }

  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("presupuesto-sw"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("worker.db"))
  }
}
