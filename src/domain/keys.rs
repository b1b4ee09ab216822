// ==========================================
// CCX 字段覆写 - 课程键 / 内容块定位键
// ==========================================
// 基础形式:
//   course-v1:ORG+COURSE+RUN
//   block-v1:ORG+COURSE+RUN+type@TYPE+block@ID
// CCX 限定形式:
//   ccx-v1:ORG+COURSE+RUN+ccx@CCX_ID
//   ccx-block-v1:ORG+COURSE+RUN+ccx@CCX_ID+type@TYPE+block@ID
// ==========================================
// 约束: 两种形式可互转, CCX 限定形式去掉 ccx@ 段即得基础形式
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const COURSE_PREFIX: &str = "course-v1";
const CCX_COURSE_PREFIX: &str = "ccx-v1";
const BLOCK_PREFIX: &str = "block-v1";
const CCX_BLOCK_PREFIX: &str = "ccx-block-v1";

/// 键解析失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无效的键: {key} ({reason})")]
pub struct InvalidKeyError {
    pub key: String,
    pub reason: String,
}

impl InvalidKeyError {
    fn new(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

// ==========================================
// CourseLocator - 基础课程标识 (org + course + run)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CourseLocator {
    pub org: String,
    pub course: String,
    pub run: String,
}

impl CourseLocator {
    pub fn new(org: &str, course: &str, run: &str) -> Self {
        Self {
            org: org.to_string(),
            course: course.to_string(),
            run: run.to_string(),
        }
    }

    fn write_parts(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}+{}", self.org, self.course, self.run)
    }
}

// ==========================================
// CourseKey - 课程键
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CourseKey {
    /// 普通课程
    Course(CourseLocator),
    /// 某门课程的 CCX 视图
    Ccx { course: CourseLocator, ccx_id: i64 },
}

impl CourseKey {
    pub fn course(org: &str, course: &str, run: &str) -> Self {
        CourseKey::Course(CourseLocator::new(org, course, run))
    }

    pub fn locator(&self) -> &CourseLocator {
        match self {
            CourseKey::Course(locator) => locator,
            CourseKey::Ccx { course, .. } => course,
        }
    }

    /// CCX 限定形式时返回内嵌的 ccx id
    pub fn ccx_id(&self) -> Option<i64> {
        match self {
            CourseKey::Course(_) => None,
            CourseKey::Ccx { ccx_id, .. } => Some(*ccx_id),
        }
    }

    pub fn is_ccx(&self) -> bool {
        self.ccx_id().is_some()
    }

    /// 去掉 CCX 限定
    pub fn to_course_locator(&self) -> CourseKey {
        CourseKey::Course(self.locator().clone())
    }

    pub fn for_ccx(&self, ccx_id: i64) -> CourseKey {
        CourseKey::Ccx {
            course: self.locator().clone(),
            ccx_id,
        }
    }

    pub fn make_usage_key(&self, block_type: &str, block_id: &str) -> BlockLocator {
        BlockLocator {
            course_key: self.clone(),
            block_type: block_type.to_string(),
            block_id: block_id.to_string(),
        }
    }
}

impl fmt::Display for CourseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CourseKey::Course(locator) => {
                write!(f, "{}:", COURSE_PREFIX)?;
                locator.write_parts(f)
            }
            CourseKey::Ccx { course, ccx_id } => {
                write!(f, "{}:", CCX_COURSE_PREFIX)?;
                course.write_parts(f)?;
                write!(f, "+ccx@{}", ccx_id)
            }
        }
    }
}

impl FromStr for CourseKey {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = split_prefix(s)?;
        let parts: Vec<&str> = rest.split('+').collect();

        match prefix {
            COURSE_PREFIX => {
                if parts.len() != 3 {
                    return Err(InvalidKeyError::new(s, "课程键需要 org+course+run 三段"));
                }
                Ok(CourseKey::Course(parse_locator(s, &parts)?))
            }
            CCX_COURSE_PREFIX => {
                if parts.len() != 4 {
                    return Err(InvalidKeyError::new(s, "CCX 课程键需要 org+course+run+ccx@id 四段"));
                }
                let course = parse_locator(s, &parts[..3])?;
                let ccx_id = parse_ccx_segment(s, parts[3])?;
                Ok(CourseKey::Ccx { course, ccx_id })
            }
            other => Err(InvalidKeyError::new(s, format!("不是课程键前缀: {}", other))),
        }
    }
}

impl TryFrom<String> for CourseKey {
    type Error = InvalidKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CourseKey> for String {
    fn from(key: CourseKey) -> Self {
        key.to_string()
    }
}

// ==========================================
// BlockLocator - 内容块定位键 (usage key)
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockLocator {
    pub course_key: CourseKey,
    pub block_type: String,
    pub block_id: String,
}

impl BlockLocator {
    pub fn course_key(&self) -> &CourseKey {
        &self.course_key
    }

    pub fn is_ccx(&self) -> bool {
        self.course_key.is_ccx()
    }

    /// 基础形式 (去掉 CCX 限定); 已是基础形式时原样克隆
    pub fn to_block_locator(&self) -> BlockLocator {
        BlockLocator {
            course_key: self.course_key.to_course_locator(),
            block_type: self.block_type.clone(),
            block_id: self.block_id.clone(),
        }
    }

    pub fn for_ccx(&self, ccx_id: i64) -> BlockLocator {
        BlockLocator {
            course_key: self.course_key.for_ccx(ccx_id),
            block_type: self.block_type.clone(),
            block_id: self.block_id.clone(),
        }
    }
}

impl fmt::Display for BlockLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.course_key {
            CourseKey::Course(locator) => {
                write!(f, "{}:", BLOCK_PREFIX)?;
                locator.write_parts(f)?;
            }
            CourseKey::Ccx { course, ccx_id } => {
                write!(f, "{}:", CCX_BLOCK_PREFIX)?;
                course.write_parts(f)?;
                write!(f, "+ccx@{}", ccx_id)?;
            }
        }
        write!(f, "+type@{}+block@{}", self.block_type, self.block_id)
    }
}

impl FromStr for BlockLocator {
    type Err = InvalidKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = split_prefix(s)?;
        let parts: Vec<&str> = rest.split('+').collect();

        let (course_key, tail) = match prefix {
            BLOCK_PREFIX => {
                if parts.len() != 5 {
                    return Err(InvalidKeyError::new(s, "块定位键段数不正确"));
                }
                (CourseKey::Course(parse_locator(s, &parts[..3])?), &parts[3..])
            }
            CCX_BLOCK_PREFIX => {
                if parts.len() != 6 {
                    return Err(InvalidKeyError::new(s, "CCX 块定位键段数不正确"));
                }
                let course = parse_locator(s, &parts[..3])?;
                let ccx_id = parse_ccx_segment(s, parts[3])?;
                (CourseKey::Ccx { course, ccx_id }, &parts[4..])
            }
            other => return Err(InvalidKeyError::new(s, format!("不是块定位键前缀: {}", other))),
        };

        let block_type = tagged_segment(s, tail[0], "type")?;
        let block_id = tagged_segment(s, tail[1], "block")?;

        Ok(BlockLocator {
            course_key,
            block_type: block_type.to_string(),
            block_id: block_id.to_string(),
        })
    }
}

impl TryFrom<String> for BlockLocator {
    type Error = InvalidKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlockLocator> for String {
    fn from(key: BlockLocator) -> Self {
        key.to_string()
    }
}

// ==========================================
// 解析辅助
// ==========================================

fn split_prefix(s: &str) -> Result<(&str, &str), InvalidKeyError> {
    s.split_once(':')
        .filter(|(_, rest)| !rest.is_empty())
        .ok_or_else(|| InvalidKeyError::new(s, "缺少前缀"))
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '%'))
}

fn parse_locator(key: &str, parts: &[&str]) -> Result<CourseLocator, InvalidKeyError> {
    for part in parts {
        if !is_valid_segment(part) {
            return Err(InvalidKeyError::new(key, format!("非法片段: '{}'", part)));
        }
    }
    Ok(CourseLocator::new(parts[0], parts[1], parts[2]))
}

fn tagged_segment<'a>(key: &str, segment: &'a str, tag: &str) -> Result<&'a str, InvalidKeyError> {
    match segment.split_once('@') {
        Some((t, value)) if t == tag && is_valid_segment(value) => Ok(value),
        _ => Err(InvalidKeyError::new(key, format!("期望 {}@... 片段, 实际: '{}'", tag, segment))),
    }
}

fn parse_ccx_segment(key: &str, segment: &str) -> Result<i64, InvalidKeyError> {
    let raw = tagged_segment(key, segment, "ccx")?;
    raw.parse::<i64>()
        .map_err(|_| InvalidKeyError::new(key, format!("ccx id 不是整数: '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_course_key() {
        let key: CourseKey = "course-v1:edX+DemoX+2024".parse().unwrap();
        assert_eq!(key, CourseKey::course("edX", "DemoX", "2024"));
        assert!(!key.is_ccx());
        assert_eq!(key.to_string(), "course-v1:edX+DemoX+2024");
    }

    #[test]
    fn test_parse_ccx_course_key() {
        let key: CourseKey = "ccx-v1:edX+DemoX+2024+ccx@12".parse().unwrap();
        assert_eq!(key.ccx_id(), Some(12));
        assert_eq!(key.to_course_locator(), CourseKey::course("edX", "DemoX", "2024"));
        assert_eq!(key.to_string(), "ccx-v1:edX+DemoX+2024+ccx@12");
    }

    #[test]
    fn test_parse_block_locator_and_strip_ccx() {
        let loc: BlockLocator = "ccx-block-v1:edX+DemoX+2024+ccx@3+type@problem+block@p1"
            .parse()
            .unwrap();
        assert!(loc.is_ccx());
        assert_eq!(loc.block_type, "problem");
        assert_eq!(loc.block_id, "p1");

        let base = loc.to_block_locator();
        assert_eq!(base.to_string(), "block-v1:edX+DemoX+2024+type@problem+block@p1");
        assert_eq!(base.for_ccx(3), loc);
    }

    #[test]
    fn test_reject_malformed_keys() {
        assert!("edX+DemoX".parse::<CourseKey>().is_err());
        assert!("course-v1:edX+DemoX".parse::<CourseKey>().is_err());
        assert!("ccx-v1:edX+DemoX+2024+ccx@abc".parse::<CourseKey>().is_err());
        assert!("block-v1:edX+DemoX+2024+type@problem".parse::<BlockLocator>().is_err());
        assert!("course-v1:edX+DemoX+2024".parse::<BlockLocator>().is_err());
        assert!("block-v1:edX+DemoX+2024+block@p1+type@problem".parse::<BlockLocator>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let loc = CourseKey::course("edX", "DemoX", "2024").make_usage_key("html", "intro");
        let json = serde_json::to_string(&loc).unwrap();
        assert_eq!(json, "\"block-v1:edX+DemoX+2024+type@html+block@intro\"");
        let back: BlockLocator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, loc);
    }
}
