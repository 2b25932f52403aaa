use crate::capture::recorder::DEFAULT_TIMELINE_CAPACITY;
use crate::{CubescopeError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// 存储目录的环境变量覆盖
pub const STORAGE_DIR_ENV: &str = "CUBESCOPE_STORAGE_DIR";
const DEFAULT_STORAGE_DIR: &str = ".cubescope";

/// 配置文件内容
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// 持久化存储目录
    pub storage_dir: PathBuf,

    /// 时间线容量
    pub timeline_capacity: usize,

    /// 默认日志级别 (RUST_LOG 优先)
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            timeline_capacity: DEFAULT_TIMELINE_CAPACITY,
            log_level: None,
        }
    }
}

impl AppConfig {
    /// 应用环境变量覆盖
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(STORAGE_DIR_ENV)
            && !dir.trim().is_empty()
        {
            self.storage_dir = PathBuf::from(dir);
        }
        self
    }
}

/// 配置文件加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 配置文件名
    const CONFIG_FILE: &'static str = "cubescope.toml";

    /// 从指定路径加载配置文件
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
        let content = fs::read_to_string(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| CubescopeError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// 查找并加载配置文件, 找不到时使用默认配置
    /// 查找顺序：
    /// 1. 当前目录及其父目录
    /// 2. 用户配置目录 ~/.config/cubescope/
    pub fn find_and_load() -> Result<AppConfig> {
        let config = match Self::find_config_file() {
            Some(path) => Self::load_from_path(&path)?,
            None => AppConfig::default(),
        };
        Ok(config.with_env_overrides())
    }

    fn find_config_file() -> Option<PathBuf> {
        Self::find_in_current_dir().or_else(Self::find_in_user_dir)
    }

    /// 从当前目录向上查找
    fn find_in_current_dir() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;

        loop {
            let config_path = current.join(Self::CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            // 尝试父目录
            if !current.pop() {
                break;
            }
        }

        None
    }

    fn find_in_user_dir() -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        let config_path = home
            .join(".config")
            .join("cubescope")
            .join(Self::CONFIG_FILE);
        config_path.exists().then_some(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_path() {
        let config_content = r#"
storage_dir = "/tmp/cubescope-test"
timeline_capacity = 250
log_level = "debug"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(config_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = ConfigLoader::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/cubescope-test"));
        assert_eq!(config.timeline_capacity, 250);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: AppConfig = toml::from_str("log_level = \"warn\"").unwrap();
        assert_eq!(config.storage_dir, PathBuf::from(DEFAULT_STORAGE_DIR));
        assert_eq!(config.timeline_capacity, DEFAULT_TIMELINE_CAPACITY);
    }

    #[test]
    fn test_invalid_config() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"timeline_capacity = \"many\"").unwrap();
        temp_file.flush().unwrap();

        assert!(matches!(
            ConfigLoader::load_from_path(temp_file.path()),
            Err(CubescopeError::Config(_))
        ));
    }
}
