// ==========================================
// CCX 字段覆写 - 自定义课程 (CCX) 与覆写记录
// ==========================================
// 对齐: ccx_course / ccx_field_override 表
// 约束: (ccx_id, location, field) 唯一, location 一律为基础形式
// ==========================================

use crate::domain::keys::{BlockLocator, CourseKey};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// CustomCourse - 自定义课程
// ==========================================
// 一个 CCX 只属于一门基础课程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCourse {
    pub id: i64,
    pub course_id: CourseKey,       // 基础课程键
    pub display_name: String,
    pub coach_id: Option<i64>,      // 辅导员用户ID
    pub created_at: NaiveDateTime,
}

impl CustomCourse {
    /// 该 CCX 视图下的课程键 (ccx-v1:...)
    pub fn locator(&self) -> CourseKey {
        self.course_id.for_ccx(self.id)
    }
}

/// 新建 CCX 的入参
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCustomCourse {
    pub course_id: CourseKey,
    pub display_name: String,
    pub coach_id: Option<i64>,
}

// ==========================================
// FieldOverride - 字段覆写记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverride {
    pub id: i64,
    pub ccx_id: i64,
    pub location: BlockLocator,     // 基础形式
    pub field: String,
    pub value: String,              // JSON 文本
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
