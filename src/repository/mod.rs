// ==========================================
// CCX 字段覆写 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑 (不做 location 归一化, 不做编解码)
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod ccx_repo;
pub mod error;
pub mod field_override_repo;

// 重导出核心仓储
pub use ccx_repo::CustomCourseRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use field_override_repo::FieldOverrideRepository;
