use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub recursive_default: bool,
    pub include_hidden_default: bool,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub release_wait_ms: u64,
    pub release_poll_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            recursive_default: false,
            include_hidden_default: false,
            retry_attempts: 2,
            retry_delay_ms: 100,
            release_wait_ms: 1000,
            release_poll_ms: 50,
        }
    }
}

impl AppConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            retry: RetryPolicy {
                attempts: self.retry_attempts,
                delay: Duration::from_millis(self.retry_delay_ms),
            },
            release_wait: Duration::from_millis(self.release_wait_ms),
            release_poll: Duration::from_millis(self.release_poll_ms.max(1)),
        }
    }
}

/// Runtime knobs shared by the synchronizer and the rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub retry: RetryPolicy,
    /// Upper bound on waiting for the replaced file to become readable again.
    pub release_wait: Duration,
    pub release_poll: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        AppConfig::default().sync_options()
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
}

pub fn app_paths() -> Result<AppPaths> {
    let proj = ProjectDirs::from("com", "vrcss", "vrcss-datetime-fixer")
        .context("OS標準設定ディレクトリを取得できませんでした")?;
    let config_dir = proj.config_dir().to_path_buf();
    Ok(AppPaths {
        config_path: config_dir.join("config.toml"),
        config_dir,
    })
}

pub fn load_config() -> Result<AppConfig> {
    let paths = app_paths()?;
    if !paths.config_path.exists() {
        return Ok(AppConfig::default());
    }

    let raw = fs::read_to_string(&paths.config_path).with_context(|| {
        format!(
            "設定ファイルを読めませんでした: {}",
            paths.config_path.display()
        )
    })?;

    parse_config(&raw)
}

pub fn save_config(config: &AppConfig) -> Result<()> {
    let paths = app_paths()?;
    fs::create_dir_all(&paths.config_dir).with_context(|| {
        format!(
            "設定ディレクトリを作成できませんでした: {}",
            paths.config_dir.display()
        )
    })?;
    let body = toml::to_string_pretty(config).context("設定のシリアライズに失敗しました")?;
    fs::write(&paths.config_path, body).with_context(|| {
        format!(
            "設定ファイルを書き込めませんでした: {}",
            paths.config_path.display()
        )
    })?;
    Ok(())
}

fn parse_config(raw: &str) -> Result<AppConfig> {
    toml::from_str::<AppConfig>(raw).context("設定ファイルのパースに失敗しました")
}
