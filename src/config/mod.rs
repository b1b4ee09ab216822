// ==========================================
// CCX 字段覆写 - 配置层
// ==========================================
// 职责: 数据库路径、连接参数、SQL 性能日志开关
// ==========================================

pub mod settings;

// 重导出
pub use settings::{default_db_path, OverrideSettings, DEFAULT_BUSY_TIMEOUT_MS};
