// ==========================================
// CCX 字段覆写 - 领域模型层
// ==========================================
// 职责: 课程键、内容块抽象、字段编解码、CCX 与覆写记录
// 红线: 不含数据访问逻辑
// ==========================================

pub mod block;
pub mod ccx;
pub mod field;
pub mod keys;

// 重导出核心类型
pub use block::{BlockIdentity, ContentBlock, OverridableBlock};
pub use ccx::{CustomCourse, FieldOverride, NewCustomCourse};
pub use field::{CodecError, FieldCodec, FieldKind, FieldValue};
pub use keys::{BlockLocator, CourseKey, CourseLocator, InvalidKeyError};
