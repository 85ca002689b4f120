use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config;
use crate::models::Gig;

/// Local copy of the last accepted canonical gig collection.
pub struct GigCache {
    conn: Connection,
}

impl GigCache {
    pub fn open_default() -> rusqlite::Result<Self> {
        Self::open(&config::data_path("gig-cache.sqlite"))
    }

    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let cache = Self {
            conn: Connection::open(path)?,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let cache = Self {
            conn: Connection::open_in_memory()?,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS gigs(
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS snapshot(
                singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
                stored_at_utc TEXT NOT NULL,
                gig_count INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Replaces the cached collection, keeping fetch order.
    pub fn store_snapshot(&mut self, gigs: &[Gig]) -> rusqlite::Result<()> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM gigs", [])?;
        {
            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO gigs (id, position, payload) VALUES (?1, ?2, ?3)")?;
            for (position, gig) in gigs.iter().enumerate() {
                let payload = serde_json::to_string(gig)
                    .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
                insert.execute(params![gig.id, position as i64, payload])?;
            }
        }
        tx.execute(
            "INSERT INTO snapshot (singleton, stored_at_utc, gig_count) VALUES (1, ?1, ?2)
             ON CONFLICT(singleton) DO UPDATE SET
               stored_at_utc = excluded.stored_at_utc,
               gig_count = excluded.gig_count",
            params![now, gigs.len() as i64],
        )?;
        tx.commit()
    }

    pub fn load_snapshot(&self) -> rusqlite::Result<Vec<Gig>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM gigs ORDER BY position")?;
        let rows = stmt.query_map([], |row| {
            let payload: String = row.get(0)?;
            serde_json::from_str::<Gig>(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Text,
                    Box::new(err),
                )
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn stored_at(&self) -> rusqlite::Result<Option<DateTime<Utc>>> {
        self.conn
            .query_row(
                "SELECT stored_at_utc FROM snapshot WHERE singleton = 1",
                [],
                |row| row.get(0),
            )
            .optional()
    }
}
