use crate::config::Config;
use crate::model::{Bookmark, NewBookmark};
use anyhow::Result;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database as LibsqlDatabase, Row};
use std::path::Path;
use std::time::Duration;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_bookmarks.sql", include_str!("migrations/001_bookmarks.sql"))];

const BOOKMARK_COLUMNS: &str = "id, user_id, title, url, created_at";

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    replica: bool,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_replica(&self) -> bool {
        self.replica
    }

    pub async fn sync(&self) -> Result<()> {
        if self.replica {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    async fn migrate(conn: &Connection) -> Result<()> {
        for (filename, sql) in SYSTEM_MIGRATIONS.iter().chain(MIGRATIONS) {
            Self::run_migration(conn, filename, sql).await?;
        }
        Ok(())
    }

    async fn from_database(db: LibsqlDatabase, replica: bool) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;
        Self::migrate(&conn).await?;
        Ok(Database { db, conn, replica })
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());

        let (db, replica) = match cfg.app.replica() {
            Some((url, token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                let db = Builder::new_synced_database(&path, url.to_string(), token.to_string())
                    .sync_interval(sync_interval)
                    .build()
                    .await?;
                (db, true)
            }
            None => {
                tracing::info!(path = ?path, "[db] running in local database mode");
                (Builder::new_local(&path).build().await?, false)
            }
        };

        Self::from_database(db, replica).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::from_database(db, false).await
    }

    fn row_to_bookmark(row: &Row) -> Result<Bookmark> {
        let created_at: String = row
            .get(4)
            .map_err(|e| anyhow::anyhow!("failed to get created_at: {e}"))?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| anyhow::anyhow!("invalid created_at {created_at:?}: {e}"))?
            .with_timezone(&Utc);

        Ok(Bookmark {
            id: row.get(0).map_err(|e| anyhow::anyhow!("failed to get id: {e}"))?,
            user_id: row.get(1).map_err(|e| anyhow::anyhow!("failed to get user_id: {e}"))?,
            title: row.get(2).map_err(|e| anyhow::anyhow!("failed to get title: {e}"))?,
            url: row.get(3).map_err(|e| anyhow::anyhow!("failed to get url: {e}"))?,
            created_at,
        })
    }

    /// All bookmarks of one owner, newest first.
    pub async fn list_bookmarks(&self, user_id: &str) -> Result<Vec<Bookmark>> {
        let query = format!(
            r#"
SELECT {BOOKMARK_COLUMNS}
FROM bookmarks
WHERE user_id = ?
ORDER BY created_at DESC, rowid DESC
"#
        );

        let mut rows = self.conn.query(&query, libsql::params![user_id]).await?;
        let mut bookmarks = vec![];
        while let Some(row) = rows.next().await? {
            bookmarks.push(Self::row_to_bookmark(&row)?);
        }
        Ok(bookmarks)
    }

    pub async fn insert_bookmark(&self, input: &NewBookmark) -> Result<Bookmark> {
        let query = format!(
            r#"
INSERT INTO bookmarks (user_id, title, url)
VALUES (?, ?, ?)
RETURNING {BOOKMARK_COLUMNS}
"#
        );

        let mut rows = self
            .conn
            .query(
                &query,
                libsql::params![input.user_id.as_str(), input.title.as_str(), input.url.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Self::row_to_bookmark(&row),
            None => anyhow::bail!("insert returned no row"),
        }
    }

    /// Returns the removed row, or `None` when `owner` has no bookmark with
    /// that id.
    pub async fn delete_bookmark(&self, id: &str, owner: &str) -> Result<Option<Bookmark>> {
        let query = format!("DELETE FROM bookmarks WHERE id = ? AND user_id = ? RETURNING {BOOKMARK_COLUMNS}");

        let mut rows = self.conn.query(&query, libsql::params![id, owner]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::row_to_bookmark(&row)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_bookmark(user_id: &str, title: &str) -> NewBookmark {
        NewBookmark {
            user_id: user_id.to_string(),
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
        }
    }

    #[tokio::test]
    async fn migrations_are_recorded_once() {
        let db = Database::open_in_memory().await.unwrap();
        Database::migrate(db.connection()).await.unwrap();

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM _migrations", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count as usize, SYSTEM_MIGRATIONS.len() + MIGRATIONS.len());
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamp() {
        let db = Database::open_in_memory().await.unwrap();
        let saved = db.insert_bookmark(&new_bookmark("u1", "a")).await.unwrap();

        assert_eq!(saved.id.len(), 32);
        assert_eq!(saved.user_id, "u1");
        assert_eq!(saved.title, "a");
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner_and_newest_first() {
        let db = Database::open_in_memory().await.unwrap();
        let first = db.insert_bookmark(&new_bookmark("u1", "first")).await.unwrap();
        let second = db.insert_bookmark(&new_bookmark("u1", "second")).await.unwrap();
        db.insert_bookmark(&new_bookmark("u2", "foreign")).await.unwrap();

        let listed = db.list_bookmarks("u1").await.unwrap();
        let ids: Vec<_> = listed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
    }

    #[tokio::test]
    async fn delete_returns_removed_row() {
        let db = Database::open_in_memory().await.unwrap();
        let saved = db.insert_bookmark(&new_bookmark("u1", "a")).await.unwrap();

        assert_eq!(db.delete_bookmark(&saved.id, "u2").await.unwrap(), None);

        let removed = db.delete_bookmark(&saved.id, "u1").await.unwrap();
        assert_eq!(removed, Some(saved.clone()));
        assert_eq!(db.delete_bookmark(&saved.id, "u1").await.unwrap(), None);
        assert!(db.list_bookmarks("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_title_violates_schema() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(db.insert_bookmark(&new_bookmark("u1", "")).await.is_err());
    }
}
