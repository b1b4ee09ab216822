// ==========================================
// CCX 字段覆写 - 内容块抽象
// ==========================================
// 职责: 宿主渲染管线传入的内容块必须实现 OverridableBlock
// 说明: 标识类型在调用边界显式给出 (BlockIdentity), 不做运行时类型探测
// ==========================================

use crate::domain::field::{FieldCodec, FieldKind};
use crate::domain::keys::{BlockLocator, CourseKey, InvalidKeyError};
use std::collections::BTreeMap;

// ==========================================
// BlockIdentity - 内容块标识
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdentity<'a> {
    /// 标识本身是课程键 (课程根节点)
    Course(&'a CourseKey),
    /// 标识是块定位键
    Usage(&'a BlockLocator),
    /// 没有自身标识, 但带有 location
    Located(&'a BlockLocator),
    /// 字符串形式的课程键, 需解析
    CourseId(&'a str),
    /// 无法识别的宿主对象, 携带类型名用于日志
    Unrecognized(&'static str),
}

impl BlockIdentity<'_> {
    /// 解析所属课程键
    ///
    /// # 返回
    /// - Ok(Some(key)): 课程键
    /// - Ok(None): 无法识别的标识
    /// - Err: 字符串课程键格式错误
    pub fn course_key(&self) -> Result<Option<CourseKey>, InvalidKeyError> {
        match self {
            BlockIdentity::Course(key) => Ok(Some((*key).clone())),
            BlockIdentity::Usage(loc) | BlockIdentity::Located(loc) => {
                Ok(Some(loc.course_key().clone()))
            }
            BlockIdentity::CourseId(raw) => raw.parse::<CourseKey>().map(Some),
            BlockIdentity::Unrecognized(_) => Ok(None),
        }
    }
}

// ==========================================
// OverridableBlock - 可覆写内容块
// ==========================================
pub trait OverridableBlock {
    /// 块定位键 (可能是 CCX 限定形式)
    fn location(&self) -> &BlockLocator;

    /// 字段编解码规则; 未声明的字段返回 None
    fn field(&self, name: &str) -> Option<&dyn FieldCodec>;

    fn identity(&self) -> BlockIdentity<'_> {
        BlockIdentity::Located(self.location())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockId {
    Usage,
    Course(CourseKey),
}

// ==========================================
// ContentBlock - 通用内容块
// ==========================================
// 字段表: 字段名 → 内置字段类型
#[derive(Debug, Clone)]
pub struct ContentBlock {
    location: BlockLocator,
    id: BlockId,
    fields: BTreeMap<String, FieldKind>,
}

impl ContentBlock {
    pub fn new(location: BlockLocator) -> Self {
        Self {
            location,
            id: BlockId::Usage,
            fields: BTreeMap::new(),
        }
    }

    /// 课程根节点: 标识为课程键, location 为 type@course+block@course
    pub fn course_root(course_key: CourseKey) -> Self {
        Self {
            location: course_key.make_usage_key("course", "course"),
            id: BlockId::Course(course_key),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.insert(name.to_string(), kind);
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

impl OverridableBlock for ContentBlock {
    fn location(&self) -> &BlockLocator {
        &self.location
    }

    fn field(&self, name: &str) -> Option<&dyn FieldCodec> {
        self.fields.get(name).map(|kind| kind as &dyn FieldCodec)
    }

    fn identity(&self) -> BlockIdentity<'_> {
        match &self.id {
            BlockId::Usage => BlockIdentity::Usage(&self.location),
            BlockId::Course(key) => BlockIdentity::Course(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_course_key() {
        let usage: BlockLocator = "ccx-block-v1:edX+DemoX+2024+ccx@4+type@vertical+block@v1"
            .parse()
            .unwrap();
        let expected: CourseKey = "ccx-v1:edX+DemoX+2024+ccx@4".parse().unwrap();

        assert_eq!(BlockIdentity::Usage(&usage).course_key().unwrap(), Some(expected.clone()));
        assert_eq!(BlockIdentity::Located(&usage).course_key().unwrap(), Some(expected.clone()));
        assert_eq!(
            BlockIdentity::CourseId("ccx-v1:edX+DemoX+2024+ccx@4").course_key().unwrap(),
            Some(expected)
        );
        assert_eq!(BlockIdentity::Unrecognized("Widget").course_key().unwrap(), None);
        assert!(BlockIdentity::CourseId("not a key").course_key().is_err());
    }

    #[test]
    fn test_course_root_identity() {
        let key = CourseKey::course("edX", "DemoX", "2024");
        let block = ContentBlock::course_root(key.clone()).with_field("start", FieldKind::Date);

        assert_eq!(block.identity(), BlockIdentity::Course(&key));
        assert_eq!(block.location().block_type, "course");
        assert!(block.field("start").is_some());
        assert!(block.field("due").is_none());
    }

    #[test]
    fn test_field_names_sorted() {
        let block = ContentBlock::new(
            CourseKey::course("edX", "DemoX", "2024").make_usage_key("problem", "p1"),
        )
        .with_field("weight", FieldKind::Float)
        .with_field("due", FieldKind::Date)
        .with_field("max_attempts", FieldKind::Integer)
        .with_field("due", FieldKind::Date);

        let names: Vec<&str> = block.field_names().collect();
        assert_eq!(names, vec!["due", "max_attempts", "weight"]);
    }
}
