use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;

use crate::error::Result;
use crate::models::{CardId, Tag};
use crate::outline::{Block, BlockId, Outline};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER,
                text TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (parent_id) REFERENCES blocks(id) ON DELETE CASCADE
            );

            -- Which cards belong to which tag (deck)
            CREATE TABLE IF NOT EXISTS card_tags (
                card_uid TEXT NOT NULL,
                tag TEXT NOT NULL,
                added_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (card_uid, tag)
            );

            CREATE INDEX IF NOT EXISTS idx_blocks_parent ON blocks(parent_id, position);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_blocks_root ON blocks(text) WHERE parent_id IS NULL;
            CREATE INDEX IF NOT EXISTS idx_card_tags_tag ON card_tags(tag);
            "#,
        )?;

        Ok(())
    }

    // Card operations
    pub fn add_card(&self, uid: &str, tags: &[String]) -> Result<()> {
        for tag in tags {
            self.conn.execute(
                "INSERT OR IGNORE INTO card_tags (card_uid, tag) VALUES (?1, ?2)",
                params![uid, tag],
            )?;
        }
        Ok(())
    }

    pub fn remove_card(&self, uid: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM card_tags WHERE card_uid = ?1", params![uid])?;
        Ok(rows > 0)
    }

    /// Cards of a tag in the order they were added.
    pub fn cards_for_tag(&self, tag: &str) -> Result<Vec<CardId>> {
        let mut stmt = self.conn.prepare(
            "SELECT card_uid FROM card_tags WHERE tag = ?1 ORDER BY added_at, rowid",
        )?;
        let rows = stmt.query_map(params![tag], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    pub fn card_tags(&self, uid: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM card_tags WHERE card_uid = ?1 ORDER BY tag")?;
        let rows = stmt.query_map(params![uid], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    pub fn list_cards(&self, tag_filter: Option<&str>) -> Result<Vec<CardId>> {
        match tag_filter {
            Some(tag) => self.cards_for_tag(tag),
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT card_uid FROM card_tags GROUP BY card_uid ORDER BY MIN(rowid)",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
            }
        }
    }

    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT tag, COUNT(card_uid) as card_count
            FROM card_tags
            GROUP BY tag
            ORDER BY tag
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(Tag {
                name: row.get(0)?,
                card_count: row.get(1)?,
            })
        })?;

        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Union of the cards of every given tag, in discovery order.
    pub fn all_card_ids(&self, tags: &[String]) -> Result<Vec<CardId>> {
        let mut seen = BTreeSet::new();
        let mut ids = Vec::new();
        for tag in tags {
            for uid in self.cards_for_tag(tag)? {
                if seen.insert(uid.clone()) {
                    ids.push(uid);
                }
            }
        }
        Ok(ids)
    }

    // Block operations
    fn children_of(&self, parent: BlockId) -> Result<Vec<(BlockId, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, text FROM blocks WHERE parent_id = ?1 ORDER BY position, id",
        )?;
        let rows = stmt.query_map(params![parent], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn load_tree(&self, parent: BlockId) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for (id, text) in self.children_of(parent)? {
            let children = self.load_tree(id)?;
            blocks.push(Block { id, text, children });
        }
        Ok(blocks)
    }
}

impl Outline for Database {
    fn get_or_create_container(&self, key: &str) -> Result<BlockId> {
        match self.find_container(key)? {
            Some(id) => Ok(id),
            None => {
                self.conn
                    .execute("INSERT INTO blocks (text) VALUES (?1)", params![key])?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    fn find_container(&self, key: &str) -> Result<Option<BlockId>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM blocks WHERE parent_id IS NULL AND text = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn get_children(&self, parent: BlockId) -> Result<Vec<Block>> {
        self.load_tree(parent)
    }

    fn get_direct_children(&self, parent: BlockId) -> Result<Vec<Block>> {
        Ok(self
            .children_of(parent)?
            .into_iter()
            .map(|(id, text)| Block {
                id,
                text,
                children: Vec::new(),
            })
            .collect())
    }

    fn create_child(&self, parent: BlockId, text: &str, position: i64) -> Result<BlockId> {
        let tx = self.conn.unchecked_transaction()?;

        let position = if position < 0 {
            tx.query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM blocks WHERE parent_id = ?1",
                params![parent],
                |row| row.get::<_, i64>(0),
            )?
        } else {
            tx.execute(
                "UPDATE blocks SET position = position + 1 WHERE parent_id = ?1 AND position >= ?2",
                params![parent, position],
            )?;
            position
        };

        tx.execute(
            "INSERT INTO blocks (parent_id, text, position) VALUES (?1, ?2, ?3)",
            params![parent, text, position],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(id)
    }

    fn update_text(&self, id: BlockId, text: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE blocks SET text = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![text, id],
        )?;
        Ok(())
    }

    fn replace_text(&self, id: BlockId, expected: &str, text: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE blocks SET text = ?1, updated_at = datetime('now') WHERE id = ?2 AND text = ?3",
            params![text, id, expected],
        )?;
        Ok(rows > 0)
    }

    fn delete_block(&self, id: BlockId) -> Result<()> {
        self.conn
            .execute("DELETE FROM blocks WHERE id = ?1", params![id])?;
        Ok(())
    }
}
