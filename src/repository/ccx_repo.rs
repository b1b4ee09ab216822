// ==========================================
// CCX 字段覆写 - 自定义课程仓储
// ==========================================
// 职责: ccx_course 表的建表、插入、按主键查找
// 说明: course_id 一律存基础形式 (course-v1:...)
// ==========================================

use crate::domain::ccx::{CustomCourse, NewCustomCourse};
use crate::domain::keys::CourseKey;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = "id, course_id, display_name, coach_id, created_at";

pub struct CustomCourseRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CustomCourseRepository {
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
            CREATE TABLE IF NOT EXISTS ccx_course (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              course_id TEXT NOT NULL,
              display_name TEXT NOT NULL,
              coach_id INTEGER,
              created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ccx_course_course
              ON ccx_course(course_id);
            "#,
        )?;
        Ok(())
    }

    /// 新建 CCX
    pub fn insert(&self, new: &NewCustomCourse) -> RepositoryResult<CustomCourse> {
        let conn = self.get_conn()?;
        let course_id = new.course_id.to_course_locator();
        let created_at: NaiveDateTime = Utc::now().naive_utc();

        conn.execute(
            r#"
            INSERT INTO ccx_course (course_id, display_name, coach_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![course_id.to_string(), new.display_name, new.coach_id, created_at],
        )?;

        Ok(CustomCourse {
            id: conn.last_insert_rowid(),
            course_id,
            display_name: new.display_name.clone(),
            coach_id: new.coach_id,
            created_at,
        })
    }

    /// 按主键查找
    pub fn find_by_id(&self, id: i64) -> RepositoryResult<Option<CustomCourse>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM ccx_course WHERE id = ?1", SELECT_COLUMNS);
        let ccx = conn
            .query_row(&sql, params![id], map_ccx_row)
            .optional()?;
        Ok(ccx)
    }

    /// 按主键获取, 不存在时返回 NotFound
    pub fn get_by_id(&self, id: i64) -> RepositoryResult<CustomCourse> {
        self.find_by_id(id)?
            .ok_or_else(|| RepositoryError::not_found("CustomCourse", id))
    }

    /// 某门基础课程下的全部 CCX
    pub fn list_by_course(&self, course_id: &CourseKey) -> RepositoryResult<Vec<CustomCourse>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM ccx_course WHERE course_id = ?1 ORDER BY id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![course_id.to_course_locator().to_string()], map_ccx_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 删除 CCX (级联删除其全部覆写记录)
    pub fn delete(&self, id: i64) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let changed = conn.execute("DELETE FROM ccx_course WHERE id = ?1", params![id])?;
        Ok(changed)
    }
}

fn map_ccx_row(row: &Row<'_>) -> rusqlite::Result<CustomCourse> {
    let course_id_str: String = row.get(1)?;
    let course_id = course_id_str.parse::<CourseKey>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(CustomCourse {
        id: row.get(0)?,
        course_id,
        display_name: row.get(2)?,
        coach_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}
