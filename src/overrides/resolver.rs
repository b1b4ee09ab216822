// ==========================================
// CCX 字段覆写 - 上下文解析
// ==========================================
// 块标识 → 课程键 → 当前生效的 CCX
// 规则:
// - 普通课程键: 无 CCX
// - ccx-v1 课程键: 按内嵌 ccx id 加载, 不存在则报 CcxNotFound
// - 无法识别的标识: 记 error 日志, 视为无 CCX
// ==========================================

use crate::domain::block::BlockIdentity;
use crate::domain::ccx::CustomCourse;
use crate::domain::keys::CourseKey;
use crate::overrides::error::{OverrideError, OverrideResult};
use crate::repository::CustomCourseRepository;
use std::sync::Arc;

pub struct ContextResolver {
    ccx_repo: Arc<CustomCourseRepository>,
}

impl ContextResolver {
    pub fn new(ccx_repo: Arc<CustomCourseRepository>) -> Self {
        Self { ccx_repo }
    }

    /// 解析块所在课程当前生效的 CCX
    ///
    /// # 返回
    /// - Ok(Some(ccx)): 处于 CCX 视图
    /// - Ok(None): 普通课程, 或无法识别的标识
    /// - Err(InvalidKey): 字符串课程键格式错误
    /// - Err(CcxNotFound): 课程键内嵌的 ccx id 没有对应记录
    pub fn resolve_active_context(
        &self,
        identity: BlockIdentity<'_>,
    ) -> OverrideResult<Option<CustomCourse>> {
        match identity.course_key()? {
            Some(course_key) => self.ccx_for_course_key(&course_key),
            None => {
                if let BlockIdentity::Unrecognized(type_name) = identity {
                    tracing::error!(
                        block_type = type_name,
                        "无法确定课程ID, 跳过 CCX 覆写计算"
                    );
                }
                Ok(None)
            }
        }
    }

    /// 字符串课程键版本
    pub fn current_ccx(&self, course_id: &str) -> OverrideResult<Option<CustomCourse>> {
        let course_key: CourseKey = course_id.parse()?;
        self.ccx_for_course_key(&course_key)
    }

    pub fn ccx_for_course_key(&self, course_key: &CourseKey) -> OverrideResult<Option<CustomCourse>> {
        let Some(ccx_id) = course_key.ccx_id() else {
            return Ok(None);
        };

        match self.ccx_repo.find_by_id(ccx_id)? {
            Some(ccx) => Ok(Some(ccx)),
            None => Err(OverrideError::CcxNotFound { ccx_id }),
        }
    }
}
