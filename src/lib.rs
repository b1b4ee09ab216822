// ==========================================
// CCX 字段覆写 - 核心库
// ==========================================
// 职责: 为自定义课程 (CCX) 按块、按字段提供覆写值
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 键、内容块、字段编解码
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 服务层 - 上下文解析、缓存、覆写读写
pub mod overrides;

// 配置层
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// SQL 性能统计
pub mod perf;

// ==========================================
// 重导出核心类型
// ==========================================

pub use config::{default_db_path, OverrideSettings};

pub use domain::{
    BlockIdentity, BlockLocator, CodecError, ContentBlock, CourseKey, CustomCourse, FieldCodec,
    FieldKind, FieldOverride, FieldValue, NewCustomCourse, OverridableBlock,
};

pub use overrides::{
    disable_overrides, CcxOverrideProvider, ContextResolver, FieldOverrideProvider,
    OverrideError, OverrideResult,
};

pub use repository::{CustomCourseRepository, FieldOverrideRepository, RepositoryError};

// ==========================================
// 常量定义
// ==========================================

// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
