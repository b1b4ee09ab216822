// ==========================================
// CCX 字段覆写 - 块级覆写缓存
// ==========================================
// 键: (基础形式 location, ccx_id) → 字段名 → 存储原文 (JSON) + 记录ID
// 解码由读取方按自身字段声明完成, 同一 location 的不同块实例共享条目
// 生命周期: 由 CcxOverrideProvider 持有, 随一次渲染结束而丢弃
// 约束: 任何写入 (set / clear / 批量删除) 后对应条目必须失效
// ==========================================

use crate::domain::keys::BlockLocator;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedOverride {
    /// 存储中的 JSON 文本, 未解码
    pub raw_value: String,
    pub override_id: i64,
}

/// 单个块在单个 CCX 下的覆写集合
pub type BlockOverrides = HashMap<String, CachedOverride>;

#[derive(Debug, Default)]
pub struct OverrideCache {
    entries: HashMap<(BlockLocator, i64), BlockOverrides>,
}

impl OverrideCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(location: &BlockLocator, ccx_id: i64) -> (BlockLocator, i64) {
        (location.to_block_locator(), ccx_id)
    }

    pub fn get(&self, location: &BlockLocator, ccx_id: i64) -> Option<&BlockOverrides> {
        self.entries.get(&Self::key(location, ccx_id))
    }

    pub fn insert(&mut self, location: &BlockLocator, ccx_id: i64, overrides: BlockOverrides) {
        self.entries.insert(Self::key(location, ccx_id), overrides);
    }

    /// 使 (块, ccx) 条目失效; 返回是否存在过
    pub fn invalidate(&mut self, location: &BlockLocator, ccx_id: i64) -> bool {
        self.entries.remove(&Self::key(location, ccx_id)).is_some()
    }

    /// 使某个 ccx 的全部条目失效
    pub fn invalidate_ccx(&mut self, ccx_id: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(_, id), _| *id != ccx_id);
        before - self.entries.len()
    }

    /// 只从缓存里去掉单个字段, 不触碰存储
    pub fn forget_field(&mut self, location: &BlockLocator, ccx_id: i64, field: &str) -> bool {
        self.entries
            .get_mut(&Self::key(location, ccx_id))
            .map(|overrides| overrides.remove(field).is_some())
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
