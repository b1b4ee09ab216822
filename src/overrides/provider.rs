// ==========================================
// CCX 字段覆写 - 覆写提供者 + 写入接口
// ==========================================
// 读路径: 块标识 → CCX → 缓存 / 仓储 → 字段编解码 → 值
// 写路径: 字段编码 → JSON 文本 → 原子 upsert → 缓存失效
// 说明:
// - 非 CCX 课程直接返回默认值, 不访问存储
// - 缓存不跨线程共享, Provider 为 !Sync
// ==========================================

use crate::config::OverrideSettings;
use crate::db::{open_sqlite_connection, record_schema_version};
use crate::domain::block::OverridableBlock;
use crate::domain::ccx::CustomCourse;
use crate::domain::field::{FieldCodec, FieldValue};
use crate::domain::keys::BlockLocator;
use crate::overrides::cache::{BlockOverrides, CachedOverride, OverrideCache};
use crate::overrides::error::{OverrideError, OverrideResult};
use crate::overrides::resolver::ContextResolver;
use crate::perf::PerfGuard;
use crate::repository::{CustomCourseRepository, FieldOverrideRepository, RepositoryError};
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

// ==========================================
// FieldOverrideProvider - 宿主扩展点
// ==========================================
pub trait FieldOverrideProvider {
    /// 返回覆写值; 没有覆写时原样返回 default
    fn get(
        &self,
        block: &dyn OverridableBlock,
        name: &str,
        default: FieldValue,
    ) -> OverrideResult<FieldValue>;
}

// ==========================================
// 覆写禁用开关 (线程内)
// ==========================================
thread_local! {
    static OVERRIDES_DISABLED: Cell<u32> = Cell::new(0);
}

/// 存活期间, 当前线程所有 Provider 读路径直接返回默认值
pub struct DisableOverridesGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for DisableOverridesGuard {
    fn drop(&mut self) {
        OVERRIDES_DISABLED.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// 用于展示未覆写的原始课程数据 (例如辅导员排课视图)
pub fn disable_overrides() -> DisableOverridesGuard {
    OVERRIDES_DISABLED.with(|d| d.set(d.get().saturating_add(1)));
    DisableOverridesGuard {
        _not_send: PhantomData,
    }
}

pub fn overrides_disabled() -> bool {
    OVERRIDES_DISABLED.with(|d| d.get() > 0)
}

// ==========================================
// CcxOverrideProvider
// ==========================================
pub struct CcxOverrideProvider {
    resolver: ContextResolver,
    overrides: Arc<FieldOverrideRepository>,
    cache: RefCell<OverrideCache>,
}

impl CcxOverrideProvider {
    pub fn new(
        ccx_repo: Arc<CustomCourseRepository>,
        override_repo: Arc<FieldOverrideRepository>,
    ) -> Self {
        Self {
            resolver: ContextResolver::new(ccx_repo),
            overrides: override_repo,
            cache: RefCell::new(OverrideCache::new()),
        }
    }

    /// 按配置打开数据库并建表
    pub fn open(settings: &OverrideSettings) -> OverrideResult<Self> {
        tracing::info!(db_path = %settings.db_path, "打开 CCX 覆写数据库");
        let conn = open_sqlite_connection(settings)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        record_schema_version(&conn).map_err(RepositoryError::from)?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> OverrideResult<Self> {
        let ccx_repo = Arc::new(CustomCourseRepository::new(conn.clone())?);
        let override_repo = Arc::new(FieldOverrideRepository::new(conn)?);
        Ok(Self::new(ccx_repo, override_repo))
    }

    pub fn resolver(&self) -> &ContextResolver {
        &self.resolver
    }

    // ==========================================
    // 读路径
    // ==========================================

    /// 按块所在课程解析 CCX 并返回覆写值
    pub fn get_override(
        &self,
        block: &dyn OverridableBlock,
        name: &str,
        default: FieldValue,
    ) -> OverrideResult<FieldValue> {
        if overrides_disabled() {
            return Ok(default);
        }

        match self.resolver.resolve_active_context(block.identity())? {
            Some(ccx) => self.get_override_for_ccx(&ccx, block, name, default),
            None => Ok(default),
        }
    }

    /// 已知 CCX 时直接读取覆写值 (不受 disable_overrides 影响)
    pub fn get_override_for_ccx(
        &self,
        ccx: &CustomCourse,
        block: &dyn OverridableBlock,
        name: &str,
        default: FieldValue,
    ) -> OverrideResult<FieldValue> {
        let raw = self.with_block_overrides(ccx, block, |overrides| {
            overrides.get(name).map(|cached| cached.raw_value.clone())
        })?;

        match raw {
            Some(raw) => Ok(decode_override(ccx, block, name, &raw)?.unwrap_or(default)),
            None => Ok(default),
        }
    }

    /// 块在 CCX 下的全部覆写 (字段名 → 值)
    pub fn fetch_overrides(
        &self,
        ccx: &CustomCourse,
        block: &dyn OverridableBlock,
    ) -> OverrideResult<HashMap<String, FieldValue>> {
        let raw: Vec<(String, String)> = self.with_block_overrides(ccx, block, |overrides| {
            overrides
                .iter()
                .map(|(field, cached)| (field.clone(), cached.raw_value.clone()))
                .collect()
        })?;

        let mut values = HashMap::with_capacity(raw.len());
        for (field, raw_value) in raw {
            if let Some(value) = decode_override(ccx, block, &field, &raw_value)? {
                values.insert(field, value);
            }
        }
        Ok(values)
    }

    /// 覆写记录ID (用于批量删除)
    pub fn override_id_for(
        &self,
        ccx: &CustomCourse,
        block: &dyn OverridableBlock,
        name: &str,
    ) -> OverrideResult<Option<i64>> {
        self.with_block_overrides(ccx, block, |overrides| {
            overrides.get(name).map(|cached| cached.override_id)
        })
    }

    fn with_block_overrides<R>(
        &self,
        ccx: &CustomCourse,
        block: &dyn OverridableBlock,
        read: impl FnOnce(&BlockOverrides) -> R,
    ) -> OverrideResult<R> {
        let location = block.location().to_block_locator();

        if let Some(overrides) = self.cache.borrow().get(&location, ccx.id) {
            tracing::trace!(ccx_id = ccx.id, location = %location, "覆写缓存命中");
            return Ok(read(overrides));
        }

        let loaded = self.load_block_overrides(ccx, &location)?;
        let result = read(&loaded);
        self.cache.borrow_mut().insert(&location, ccx.id, loaded);
        Ok(result)
    }

    /// 按 location 加载全部存储记录, 不解码也不按块字段过滤
    fn load_block_overrides(
        &self,
        ccx: &CustomCourse,
        location: &BlockLocator,
    ) -> OverrideResult<BlockOverrides> {
        let _perf = PerfGuard::new("ccx.load_block_overrides");
        let records = self.overrides.filter_by_block(ccx.id, location)?;

        let overrides: BlockOverrides = records
            .into_iter()
            .map(|record| {
                (
                    record.field,
                    CachedOverride {
                        raw_value: record.value,
                        override_id: record.id,
                    },
                )
            })
            .collect();

        tracing::debug!(
            ccx_id = ccx.id,
            location = %location,
            count = overrides.len(),
            "加载块覆写"
        );
        Ok(overrides)
    }

    // ==========================================
    // 写路径
    // ==========================================

    /// 设置字段覆写 (已存在则覆盖)
    pub fn set_override(
        &self,
        ccx: &CustomCourse,
        block: &dyn OverridableBlock,
        name: &str,
        value: FieldValue,
    ) -> OverrideResult<()> {
        let _perf = PerfGuard::new("ccx.set_override");
        let location = block.location().to_block_locator();
        let codec = field_codec(block, name, &location)?;

        let external = codec.to_json(&value).map_err(|source| OverrideError::Codec {
            field: name.to_string(),
            source,
        })?;
        let serialized = serde_json::to_string(&external)?;

        let override_id = self.overrides.upsert(ccx.id, &location, name, &serialized)?;
        tracing::info!(
            ccx_id = ccx.id,
            location = %location,
            field = name,
            override_id,
            "字段覆写已保存"
        );

        self.cache.borrow_mut().invalidate(&location, ccx.id);
        Ok(())
    }

    /// 清除字段覆写; 不存在时什么也不做
    pub fn clear_override(
        &self,
        ccx: &CustomCourse,
        block: &dyn OverridableBlock,
        name: &str,
    ) -> OverrideResult<()> {
        let location = block.location().to_block_locator();
        let deleted = self.overrides.delete(ccx.id, &location, name)?;
        if deleted > 0 {
            tracing::info!(ccx_id = ccx.id, location = %location, field = name, "字段覆写已清除");
        }

        self.cache.borrow_mut().invalidate(&location, ccx.id);
        Ok(())
    }

    /// 按记录ID批量删除覆写; 只删除属于该 CCX 的记录
    pub fn bulk_delete_overrides(&self, ccx: &CustomCourse, ids: &[i64]) -> OverrideResult<usize> {
        let deleted = self.overrides.delete_by_ids(ccx.id, ids)?;
        tracing::info!(ccx_id = ccx.id, requested = ids.len(), deleted, "批量删除字段覆写");

        // 记录ID不对应具体块, 整个 CCX 的缓存一起失效
        self.cache.borrow_mut().invalidate_ccx(ccx.id);
        Ok(deleted)
    }

    // ==========================================
    // 缓存维护
    // ==========================================

    /// 只从缓存里去掉单个字段 (存储不变)
    pub fn forget_cached_field(
        &self,
        ccx: &CustomCourse,
        block: &dyn OverridableBlock,
        name: &str,
    ) -> bool {
        self.cache
            .borrow_mut()
            .forget_field(block.location(), ccx.id, name)
    }

    /// 结束本轮渲染的缓存
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn cached_block_count(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl FieldOverrideProvider for CcxOverrideProvider {
    fn get(
        &self,
        block: &dyn OverridableBlock,
        name: &str,
        default: FieldValue,
    ) -> OverrideResult<FieldValue> {
        self.get_override(block, name, default)
    }
}

fn field_codec<'a>(
    block: &'a dyn OverridableBlock,
    name: &str,
    location: &BlockLocator,
) -> OverrideResult<&'a dyn FieldCodec> {
    block.field(name).ok_or_else(|| OverrideError::UnknownField {
        field: name.to_string(),
        location: location.to_string(),
    })
}

/// 按调用方块的字段声明解码存储原文; 块未声明该字段时返回 None
fn decode_override(
    ccx: &CustomCourse,
    block: &dyn OverridableBlock,
    field: &str,
    raw_value: &str,
) -> OverrideResult<Option<FieldValue>> {
    let Some(codec) = block.field(field) else {
        tracing::warn!(
            ccx_id = ccx.id,
            location = %block.location(),
            field = %field,
            "覆写字段未在块上声明, 已跳过"
        );
        return Ok(None);
    };

    let external: JsonValue = serde_json::from_str(raw_value)?;
    let value = codec
        .from_json(external)
        .map_err(|source| OverrideError::Codec {
            field: field.to_string(),
            source,
        })?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::block::{BlockIdentity, ContentBlock};
    use crate::domain::ccx::NewCustomCourse;
    use crate::domain::field::FieldKind;
    use crate::domain::keys::CourseKey;
    use chrono::{TimeZone, Utc};

    fn int(v: i64) -> FieldValue {
        FieldValue::Integer(v)
    }

    struct Fixture {
        provider: CcxOverrideProvider,
        overrides: Arc<FieldOverrideRepository>,
        ccx: CustomCourse,
    }

    fn setup() -> Fixture {
        crate::logging::init_test();
        let conn = crate::db::open_in_memory().unwrap();
        let ccx_repo = Arc::new(CustomCourseRepository::new(conn.clone()).unwrap());
        let overrides = Arc::new(FieldOverrideRepository::new(conn).unwrap());
        let ccx = ccx_repo
            .insert(&NewCustomCourse {
                course_id: CourseKey::course("edX", "DemoX", "2024"),
                display_name: "cohort".to_string(),
                coach_id: Some(1),
            })
            .unwrap();

        Fixture {
            provider: CcxOverrideProvider::new(ccx_repo, overrides.clone()),
            overrides,
            ccx,
        }
    }

    fn ccx_problem(ccx: &CustomCourse) -> ContentBlock {
        ContentBlock::new(ccx.locator().make_usage_key("problem", "p1"))
            .with_field("max_attempts", FieldKind::Integer)
            .with_field("due", FieldKind::Date)
            .with_field("visible_to_staff_only", FieldKind::Boolean)
    }

    #[test]
    fn test_max_attempts_lifecycle() {
        let f = setup();
        let block = ccx_problem(&f.ccx);

        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(3));

        f.provider.set_override(&f.ccx, &block, "max_attempts", int(5)).unwrap();
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(5));

        f.provider.clear_override(&f.ccx, &block, "max_attempts").unwrap();
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(3));
    }

    #[test]
    fn test_base_course_block_skips_store() {
        let f = setup();
        let block = ContentBlock::new(f.ccx.course_id.make_usage_key("problem", "p1"))
            .with_field("max_attempts", FieldKind::Integer);

        f.provider
            .set_override(&f.ccx, &ccx_problem(&f.ccx), "max_attempts", int(9))
            .unwrap();
        f.provider.clear_cache();

        assert_eq!(f.provider.get(&block, "max_attempts", int(1)).unwrap(), int(1));
        assert_eq!(f.provider.cached_block_count(), 0);
    }

    #[test]
    fn test_date_round_trip_through_codec() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        let due = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();

        f.provider.set_override(&f.ccx, &block, "due", due.into()).unwrap();

        let stored = f.overrides.get(f.ccx.id, &block.location().to_block_locator(), "due").unwrap();
        assert_eq!(stored.value, "\"2025-05-01T12:00:00Z\"");
        assert_eq!(
            f.provider.get_override(&block, "due", FieldValue::Null).unwrap(),
            FieldValue::Date(due)
        );
    }

    #[test]
    fn test_set_unknown_field_fails() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        let err = f
            .provider
            .set_override(&f.ccx, &block, "weight", 1.0.into())
            .unwrap_err();
        assert!(matches!(err, OverrideError::UnknownField { .. }));
    }

    #[test]
    fn test_set_wrong_type_fails() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        let err = f
            .provider
            .set_override(&f.ccx, &block, "max_attempts", "many".into())
            .unwrap_err();
        assert!(matches!(err, OverrideError::Codec { .. }));
    }

    #[test]
    fn test_cache_serves_repeat_reads_until_write() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        f.provider.set_override(&f.ccx, &block, "max_attempts", int(5)).unwrap();
        f.provider.get_override(&block, "max_attempts", int(3)).unwrap();
        assert_eq!(f.provider.cached_block_count(), 1);

        // 绕过 Provider 直接改存储, 缓存仍返回旧值
        let base = block.location().to_block_locator();
        f.overrides.upsert(f.ccx.id, &base, "max_attempts", "8").unwrap();
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(5));

        // 通过 Provider 写入后失效
        f.provider
            .set_override(&f.ccx, &block, "visible_to_staff_only", true.into())
            .unwrap();
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(8));
    }

    #[test]
    fn test_disable_overrides_guard() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        f.provider.set_override(&f.ccx, &block, "max_attempts", int(5)).unwrap();

        {
            let _guard = disable_overrides();
            assert!(overrides_disabled());
            assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(3));
            assert_eq!(
                f.provider
                    .get_override_for_ccx(&f.ccx, &block, "max_attempts", int(3))
                    .unwrap(),
                int(5)
            );
        }

        assert!(!overrides_disabled());
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(5));
    }

    #[test]
    fn test_override_id_and_bulk_delete() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        f.provider.set_override(&f.ccx, &block, "max_attempts", int(5)).unwrap();
        f.provider.set_override(&f.ccx, &block, "due", FieldValue::Null).unwrap();

        let id = f.provider.override_id_for(&f.ccx, &block, "due").unwrap().unwrap();
        assert_eq!(f.provider.override_id_for(&f.ccx, &block, "visible_to_staff_only").unwrap(), None);

        assert_eq!(f.provider.bulk_delete_overrides(&f.ccx, &[id]).unwrap(), 1);
        assert_eq!(f.provider.cached_block_count(), 0);
        assert_eq!(f.provider.override_id_for(&f.ccx, &block, "due").unwrap(), None);
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(5));
    }

    #[test]
    fn test_forget_cached_field_leaves_store() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        f.provider.set_override(&f.ccx, &block, "max_attempts", int(5)).unwrap();
        f.provider.get_override(&block, "max_attempts", int(3)).unwrap();

        assert!(f.provider.forget_cached_field(&f.ccx, &block, "max_attempts"));
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(3));

        f.provider.clear_cache();
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(5));
    }

    #[test]
    fn test_stored_field_missing_from_schema_is_skipped() {
        let f = setup();
        let block = ccx_problem(&f.ccx);
        f.provider.set_override(&f.ccx, &block, "max_attempts", int(5)).unwrap();

        let narrow = ContentBlock::new(block.location().clone()).with_field("due", FieldKind::Date);
        let all = f.provider.fetch_overrides(&f.ccx, &narrow).unwrap();
        assert!(all.is_empty());
        assert_eq!(
            f.provider.get_override(&narrow, "max_attempts", int(3)).unwrap(),
            int(3)
        );
    }

    #[test]
    fn test_blocks_sharing_location_decode_with_own_fields() {
        let f = setup();
        let wide = ccx_problem(&f.ccx);
        f.provider.set_override(&f.ccx, &wide, "max_attempts", int(5)).unwrap();

        // 窄块先读, 缓存条目由它加载
        let narrow = ContentBlock::new(wide.location().clone()).with_field("due", FieldKind::Date);
        assert_eq!(
            f.provider.get_override(&narrow, "due", FieldValue::Null).unwrap(),
            FieldValue::Null
        );
        assert_eq!(f.provider.cached_block_count(), 1);

        assert_eq!(f.provider.get_override(&wide, "max_attempts", int(3)).unwrap(), int(5));
        assert_eq!(
            f.provider.fetch_overrides(&f.ccx, &wide).unwrap().get("max_attempts"),
            Some(&int(5))
        );
        assert!(f.provider.override_id_for(&f.ccx, &narrow, "max_attempts").unwrap().is_some());
    }

    #[test]
    fn test_shared_entry_decodes_per_block_kind() {
        let f = setup();
        let as_int = ccx_problem(&f.ccx);
        f.provider.set_override(&f.ccx, &as_int, "max_attempts", int(4)).unwrap();

        let as_float =
            ContentBlock::new(as_int.location().clone()).with_field("max_attempts", FieldKind::Float);
        assert_eq!(
            f.provider.get_override(&as_int, "max_attempts", int(0)).unwrap(),
            int(4)
        );
        assert_eq!(
            f.provider.get_override(&as_float, "max_attempts", FieldValue::Null).unwrap(),
            FieldValue::Float(4.0)
        );
    }

    #[test]
    fn test_unrecognized_identity_returns_default() {
        struct Opaque(BlockLocator);
        impl OverridableBlock for Opaque {
            fn location(&self) -> &BlockLocator {
                &self.0
            }
            fn field(&self, _name: &str) -> Option<&dyn FieldCodec> {
                Some(&FieldKind::Integer as &dyn FieldCodec)
            }
            fn identity(&self) -> BlockIdentity<'_> {
                BlockIdentity::Unrecognized("Opaque")
            }
        }

        let f = setup();
        let block = Opaque(f.ccx.locator().make_usage_key("problem", "p1"));
        f.provider.set_override(&f.ccx, &block, "max_attempts", int(5)).unwrap();
        assert_eq!(f.provider.get_override(&block, "max_attempts", int(3)).unwrap(), int(3));
    }
}
