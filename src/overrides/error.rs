// ==========================================
// CCX 字段覆写 - 服务层错误类型
// ==========================================
// 说明:
// - 无法识别的块标识不是错误 (降级为默认值), 不在此枚举中
// - CCX 不存在需要上抛, 不在本地吞掉
// ==========================================

use crate::domain::field::CodecError;
use crate::domain::keys::InvalidKeyError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OverrideError {
    #[error("CCX 不存在: ccx_id={ccx_id}")]
    CcxNotFound { ccx_id: i64 },

    #[error(transparent)]
    InvalidKey(#[from] InvalidKeyError),

    #[error("字段未声明: field={field}, location={location}")]
    UnknownField { field: String, location: String },

    #[error("字段编解码失败 (field={field}): {source}")]
    Codec {
        field: String,
        #[source]
        source: CodecError,
    },

    #[error("覆写值 JSON 处理失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result 类型别名
pub type OverrideResult<T> = Result<T, OverrideError>;
