// ==========================================
// CCX 字段覆写 - 字段覆写仓储
// ==========================================
// 职责:
// 1) 持久化 (ccx, location, field) → JSON 文本
// 2) 提供单点查询 / 按 (ccx, 块) 批量拉取
// 3) 提供原子 upsert 与幂等删除
//
// 说明:
// - UNIQUE(ccx_id, location, field) 由数据库保证, 冲突插入报 UniqueConstraintViolation
// - 仓储不做 location 归一化, 调用方负责传入基础形式
// ==========================================

use crate::domain::ccx::FieldOverride;
use crate::domain::keys::BlockLocator;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "id, ccx_id, location, field, value, created_at, updated_at";

pub struct FieldOverrideRepository {
    conn: Arc<Mutex<Connection>>,
}

impl FieldOverrideRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let repo = Self { conn };
        repo.ensure_schema()?;
        Ok(repo)
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn ensure_schema(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ccx_field_override (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              ccx_id INTEGER NOT NULL REFERENCES ccx_course(id) ON DELETE CASCADE,
              location TEXT NOT NULL,
              field TEXT NOT NULL,
              value TEXT NOT NULL,
              created_at TEXT NOT NULL,
              updated_at TEXT NOT NULL,
              UNIQUE(ccx_id, location, field)
            );

            CREATE INDEX IF NOT EXISTS idx_ccx_field_override_block
              ON ccx_field_override(ccx_id, location);
            "#,
        )?;
        Ok(())
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入新记录; 键已存在时返回 UniqueConstraintViolation
    pub fn create(
        &self,
        ccx_id: i64,
        location: &BlockLocator,
        field: &str,
        value: &str,
    ) -> RepositoryResult<FieldOverride> {
        let conn = self.get_conn()?;
        let now: NaiveDateTime = Utc::now().naive_utc();

        conn.execute(
            r#"
            INSERT INTO ccx_field_override (ccx_id, location, field, value, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
            params![ccx_id, location.to_string(), field, value, now],
        )?;

        Ok(FieldOverride {
            id: conn.last_insert_rowid(),
            ccx_id,
            location: location.clone(),
            field: field.to_string(),
            value: value.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// 原子 upsert: 键不存在则插入, 存在则覆盖 value
    ///
    /// # 返回
    /// - Ok(id): 记录主键
    pub fn upsert(
        &self,
        ccx_id: i64,
        location: &BlockLocator,
        field: &str,
        value: &str,
    ) -> RepositoryResult<i64> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let now: NaiveDateTime = Utc::now().naive_utc();
        let location_str = location.to_string();

        tx.execute(
            r#"
            INSERT INTO ccx_field_override (ccx_id, location, field, value, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(ccx_id, location, field) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![ccx_id, location_str, field, value, now],
        )?;

        let id: i64 = tx.query_row(
            "SELECT id FROM ccx_field_override WHERE ccx_id = ?1 AND location = ?2 AND field = ?3",
            params![ccx_id, location_str, field],
            |row| row.get(0),
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(id)
    }

    /// 按主键覆盖 value
    pub fn update_value(&self, id: i64, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let now: NaiveDateTime = Utc::now().naive_utc();
        let changed = conn.execute(
            "UPDATE ccx_field_override SET value = ?1, updated_at = ?2 WHERE id = ?3",
            params![value, now, id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::not_found("FieldOverride", id));
        }
        Ok(())
    }

    /// 删除单条记录; 返回删除行数 (0 表示本来就不存在)
    pub fn delete(&self, ccx_id: i64, location: &BlockLocator, field: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let changed = conn.execute(
            "DELETE FROM ccx_field_override WHERE ccx_id = ?1 AND location = ?2 AND field = ?3",
            params![ccx_id, location.to_string(), field],
        )?;
        Ok(changed)
    }

    /// 批量按主键删除, 只删除属于 ccx_id 的记录
    pub fn delete_by_ids(&self, ccx_id: i64, ids: &[i64]) -> RepositoryResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut deleted = 0usize;
        {
            let mut stmt =
                tx.prepare("DELETE FROM ccx_field_override WHERE ccx_id = ?1 AND id = ?2")?;
            for id in ids {
                deleted += stmt.execute(params![ccx_id, id])?;
            }
        }

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(deleted)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按唯一键获取, 不存在时返回 NotFound
    pub fn get(&self, ccx_id: i64, location: &BlockLocator, field: &str) -> RepositoryResult<FieldOverride> {
        self.find(ccx_id, location, field)?.ok_or_else(|| {
            RepositoryError::not_found("FieldOverride", format!("{}/{}/{}", ccx_id, location, field))
        })
    }

    pub fn find(
        &self,
        ccx_id: i64,
        location: &BlockLocator,
        field: &str,
    ) -> RepositoryResult<Option<FieldOverride>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM ccx_field_override WHERE ccx_id = ?1 AND location = ?2 AND field = ?3",
            SELECT_COLUMNS
        );
        let row = conn
            .query_row(&sql, params![ccx_id, location.to_string(), field], map_override_row)
            .optional()?;
        Ok(row)
    }

    pub fn find_by_id(&self, id: i64) -> RepositoryResult<Option<FieldOverride>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM ccx_field_override WHERE id = ?1", SELECT_COLUMNS);
        let row = conn.query_row(&sql, params![id], map_override_row).optional()?;
        Ok(row)
    }

    /// 某个 CCX 下某个块的全部覆写
    pub fn filter_by_block(&self, ccx_id: i64, location: &BlockLocator) -> RepositoryResult<Vec<FieldOverride>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM ccx_field_override WHERE ccx_id = ?1 AND location = ?2 ORDER BY field",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![ccx_id, location.to_string()], map_override_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 唯一键下的记录数 (0 或 1)
    pub fn count_for_key(&self, ccx_id: i64, location: &BlockLocator, field: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ccx_field_override WHERE ccx_id = ?1 AND location = ?2 AND field = ?3",
            params![ccx_id, location.to_string(), field],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn count_by_ccx(&self, ccx_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ccx_field_override WHERE ccx_id = ?1",
            params![ccx_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn map_override_row(row: &Row<'_>) -> rusqlite::Result<FieldOverride> {
    let location_str: String = row.get(2)?;
    let location = location_str.parse::<BlockLocator>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(FieldOverride {
        id: row.get(0)?,
        ccx_id: row.get(1)?,
        location,
        field: row.get(3)?,
        value: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}
