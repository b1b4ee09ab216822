// ==========================================
// CCX 字段覆写 - 运行配置
// ==========================================
// 来源优先级: 环境变量 > 默认值
// 环境变量:
// - CCX_OVERRIDES_DB_PATH: 数据库文件路径
// - CCX_OVERRIDES_BUSY_TIMEOUT_MS: SQLite busy_timeout
// - CCX_OVERRIDES_PERF_SQL: 开启 SQL 计数/慢查询日志 (1/true/yes/on)
// - CCX_OVERRIDES_SLOW_SQL_MS: 慢 SQL 阈值
// ==========================================

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_DB_PATH: &str = "CCX_OVERRIDES_DB_PATH";
pub const ENV_BUSY_TIMEOUT_MS: &str = "CCX_OVERRIDES_BUSY_TIMEOUT_MS";
pub const ENV_PERF_SQL: &str = "CCX_OVERRIDES_PERF_SQL";
pub const ENV_SLOW_SQL_MS: &str = "CCX_OVERRIDES_SLOW_SQL_MS";

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

const DB_FILE_NAME: &str = "ccx_overrides.db";

// ==========================================
// OverrideSettings - 覆写模块配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSettings {
    pub db_path: String,
    pub busy_timeout_ms: u64,
    pub perf_sql: bool,
    pub slow_sql_ms: u64,
}

impl Default for OverrideSettings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            perf_sql: cfg!(debug_assertions),
            slow_sql_ms: if cfg!(debug_assertions) { 50 } else { 200 },
        }
    }
}

impl OverrideSettings {
    /// 从进程环境变量加载
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载; 缺失或无法解析的项使用默认值
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH) {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                settings.db_path = trimmed.to_string();
            }
        }

        if let Some(ms) = lookup(ENV_BUSY_TIMEOUT_MS).and_then(|v| v.trim().parse::<u64>().ok()) {
            settings.busy_timeout_ms = ms;
        }

        if let Some(flag) = lookup(ENV_PERF_SQL) {
            settings.perf_sql = is_true(&flag);
        }

        if let Some(ms) = lookup(ENV_SLOW_SQL_MS).and_then(|v| v.trim().parse::<u64>().ok()) {
            settings.slow_sql_ms = ms;
        }

        settings
    }

    /// 内存库配置 (测试/临时渲染)
    pub fn in_memory() -> Self {
        Self {
            db_path: ":memory:".to_string(),
            ..Self::default()
        }
    }
}

pub(crate) fn is_true(v: &str) -> bool {
    matches!(
        v.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// 默认数据库路径: 用户数据目录/ccx-overrides/ccx_overrides.db
///
/// 拿不到用户数据目录时回退到当前目录
pub fn default_db_path() -> String {
    let path = match dirs::data_dir() {
        Some(data_dir) => data_dir.join("ccx-overrides").join(DB_FILE_NAME),
        None => PathBuf::from(".").join(DB_FILE_NAME),
    };
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup_overrides_defaults() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, " /tmp/ccx.db "),
            (ENV_BUSY_TIMEOUT_MS, "750"),
            (ENV_PERF_SQL, "off"),
            (ENV_SLOW_SQL_MS, "10"),
        ]
        .into_iter()
        .collect();

        let settings = OverrideSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.db_path, "/tmp/ccx.db");
        assert_eq!(settings.busy_timeout_ms, 750);
        assert!(!settings.perf_sql);
        assert_eq!(settings.slow_sql_ms, 10);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let settings = OverrideSettings::from_lookup(|k| match k {
            ENV_BUSY_TIMEOUT_MS => Some("soon".to_string()),
            ENV_DB_PATH => Some("   ".to_string()),
            _ => None,
        });

        assert_eq!(settings.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(settings.db_path, default_db_path());
    }

    #[test]
    fn test_default_db_path_file_name() {
        assert!(default_db_path().ends_with(DB_FILE_NAME));
    }
}
