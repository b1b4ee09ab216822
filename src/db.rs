// ==========================================
// CCX 字段覆写 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键级联删除覆写记录依赖 foreign_keys)
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// ==========================================

use crate::config::{OverrideSettings, DEFAULT_BUSY_TIMEOUT_MS};
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置与 SQL 性能统计
///
/// 文件路径的父目录不存在时先创建 (首次运行时数据目录下尚无 ccx-overrides/)
pub fn open_sqlite_connection(settings: &OverrideSettings) -> rusqlite::Result<Connection> {
    ensure_parent_dir(&settings.db_path);
    let mut conn = Connection::open(&settings.db_path)?;
    configure_sqlite_connection(&conn, settings.busy_timeout_ms)?;
    crate::perf::install_sqlite_tracing(&mut conn, settings);
    Ok(conn)
}

fn ensure_parent_dir(db_path: &str) {
    if db_path == ":memory:" || db_path.starts_with("file:") {
        return;
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            // 创建失败时由随后的 Connection::open 报告
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(dir = %parent.display(), error = %e, "创建数据库目录失败");
            }
        }
    }
}

/// 打开内存库（测试用）
pub fn open_in_memory() -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn, DEFAULT_BUSY_TIMEOUT_MS)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 写入 schema_version（幂等）
pub fn record_schema_version(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
          version INTEGER PRIMARY KEY,
          applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
