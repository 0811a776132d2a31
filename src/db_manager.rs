use crate::playlist::{ItemOrigin, PlaylistItem};
use rusqlite::{params, Connection, OptionalExtension};

/// Keyed persistence for the playlist: one table with the ordered item
/// metadata and one blob table holding file payloads keyed by content hash.
pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn new() -> Result<Self, rusqlite::Error> {
        let data_dir = dirs::data_dir()
            .expect("Could not find data directory")
            .join("spectune");

        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).expect("Could not create data directory");
        }

        let db_path = data_dir.join("playlist.db");
        let conn = Connection::open(db_path)?;

        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                extension TEXT NOT NULL,
                origin TEXT NOT NULL,
                source TEXT NOT NULL,
                size INTEGER NOT NULL,
                position INTEGER NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                id TEXT PRIMARY KEY,
                payload BLOB NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Rewrites the whole ordered item list in one transaction.
    pub fn replace_items(&mut self, items: &[PlaylistItem]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM items", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO items (id, name, extension, origin, source, size, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (position, item) in items.iter().enumerate() {
                stmt.execute(params![
                    item.id,
                    item.name,
                    item.extension,
                    item.origin.as_str(),
                    item.source,
                    item.size,
                    position as i64,
                ])?;
            }
        }
        tx.commit()
    }

    /// Restores the ordered item list; rows with an unknown origin are skipped.
    pub fn restore_items(&self) -> Result<Vec<PlaylistItem>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, extension, origin, source, size FROM items ORDER BY position ASC",
        )?;
        let item_iter = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in item_iter {
            let (id, name, extension, origin, source, size) = row?;
            let Some(origin) = ItemOrigin::from_str(&origin) else {
                log::warn!("DbManager: skipping item {} with unknown origin {}", id, origin);
                continue;
            };
            items.push(PlaylistItem {
                id,
                name,
                extension,
                origin,
                source,
                size,
            });
        }
        Ok(items)
    }

    pub fn put_blob(&self, id: &str, payload: &[u8]) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR REPLACE INTO blobs (id, payload) VALUES (?1, ?2)",
            params![id, payload],
        )?;
        Ok(())
    }

    pub fn get_blob(&self, id: &str) -> Result<Option<Vec<u8>>, rusqlite::Error> {
        self.conn
            .query_row("SELECT payload FROM blobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
    }

    pub fn delete_blob(&self, id: &str) -> Result<(), rusqlite::Error> {
        self.conn
            .execute("DELETE FROM blobs WHERE id = ?1", params![id])?;
        Ok(())
    }
}
