//! The block-outline storage model everything is persisted into.
//!
//! Records live as nested text nodes: a container per page, a `data` block
//! under it, and one subtree per card (plus the priority ranking line).

use crate::error::Result;

pub type BlockId = i64;

/// Insert as the last child.
pub const APPEND: i64 = -1;

/// Name of the block under the page container that holds all practice data.
pub const DATA_BLOCK: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub text: String,
    pub children: Vec<Block>,
}

pub trait Outline {
    fn get_or_create_container(&self, key: &str) -> Result<BlockId>;

    /// Like [`get_or_create_container`](Self::get_or_create_container) but
    /// never writes.
    fn find_container(&self, key: &str) -> Result<Option<BlockId>>;

    /// Children in position order, each with its full subtree.
    fn get_children(&self, parent: BlockId) -> Result<Vec<Block>>;

    /// Children in position order without their subtrees.
    fn get_direct_children(&self, parent: BlockId) -> Result<Vec<Block>>;

    /// `position` 0 inserts first, `APPEND` inserts last.
    fn create_child(&self, parent: BlockId, text: &str, position: i64) -> Result<BlockId>;

    fn update_text(&self, id: BlockId, text: &str) -> Result<()>;

    /// Write `text` only if the block still holds `expected`. Returns false
    /// when another writer got there first.
    fn replace_text(&self, id: BlockId, expected: &str, text: &str) -> Result<bool>;

    /// Remove a block and its whole subtree.
    fn delete_block(&self, id: BlockId) -> Result<()>;
}

/// Find a direct child by exact text, creating it at `position` if missing.
pub fn get_or_create_child<O: Outline + ?Sized>(
    outline: &O,
    parent: BlockId,
    text: &str,
    position: i64,
) -> Result<BlockId> {
    let existing = outline
        .get_direct_children(parent)?
        .into_iter()
        .find(|c| c.text == text);

    match existing {
        Some(block) => Ok(block.id),
        None => outline.create_child(parent, text, position),
    }
}

/// The `data` block of a page, created on first access.
pub fn data_block<O: Outline + ?Sized>(outline: &O, page_title: &str) -> Result<BlockId> {
    let page = outline.get_or_create_container(page_title)?;
    get_or_create_child(outline, page, DATA_BLOCK, APPEND)
}

/// The `data` block of a page if it exists. Creates nothing.
pub fn find_data_block<O: Outline + ?Sized>(outline: &O, page_title: &str) -> Result<Option<BlockId>> {
    let Some(page) = outline.find_container(page_title)? else {
        return Ok(None);
    };
    Ok(outline
        .get_direct_children(page)?
        .into_iter()
        .find(|b| b.text == DATA_BLOCK)
        .map(|b| b.id))
}

/// Split a `key:: value` line.
pub fn parse_attribute(text: &str) -> Option<(&str, &str)> {
    let (key, value) = text.split_once("::")?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

/// Text between the first `open` and the following `close`.
pub fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let len = text[start..].find(close)?;
    Some(&text[start..start + len])
}

/// `((uid))` block reference.
pub fn block_ref(uid: &str) -> String {
    format!("(({}))", uid)
}
