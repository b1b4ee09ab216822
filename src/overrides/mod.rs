// ==========================================
// CCX 字段覆写 - 服务层
// ==========================================
// 职责: 上下文解析、块级缓存、覆写读取与写入
// ==========================================

pub mod cache;
pub mod error;
pub mod provider;
pub mod resolver;

pub use cache::{BlockOverrides, CachedOverride, OverrideCache};
pub use error::{OverrideError, OverrideResult};
pub use provider::{
    disable_overrides, overrides_disabled, CcxOverrideProvider, DisableOverridesGuard,
    FieldOverrideProvider,
};
pub use resolver::ContextResolver;
