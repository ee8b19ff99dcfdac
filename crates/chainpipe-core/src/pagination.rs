//! Keyset pagination over any [`Document`] collection.
//!
//! A window is addressed by an opaque [`Cursor`] wrapping a primary key and a
//! signed page size. Positive sizes page from the newest item toward older
//! ones, negative sizes page from the oldest item toward newer ones. Items
//! are always returned newest first. Because cursors reference keys rather
//! than offsets, pages stay correct while new items are inserted.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::PipelineError;
use crate::store::{Document, Filter, FindOptions, Op, PersistentStore, SortOrder, PK_FIELD};

// ─── Cursor ───────────────────────────────────────────────────────────────────

/// Opaque position in a collection. Encodes the item's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cursor(u64);

impl Cursor {
    pub fn new(key: u64) -> Self {
        Self(key)
    }

    /// The primary key this cursor points at.
    pub fn key(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .ok_or_else(|| PipelineError::InvalidCursor(s.to_string()))?;
        u64::from_str_radix(hex, 16)
            .map(Cursor)
            .map_err(|_| PipelineError::InvalidCursor(s.to_string()))
    }
}

impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ─── ListWindow ───────────────────────────────────────────────────────────────

/// One page of a collection plus boundary metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ListWindow<T> {
    /// Items, newest first.
    pub items: Vec<T>,
    /// Number of items matching `filter`.
    pub total: u64,
    /// Cursor of the first (newest) item in the window.
    pub first: Option<Cursor>,
    /// Cursor of the last (oldest) item in the window.
    pub last: Option<Cursor>,
    /// The window starts at the newest item matching the filter.
    pub is_start: bool,
    /// The window ends at the oldest item matching the filter.
    pub is_end: bool,
    /// The collection filter this window was built for.
    pub filter: Filter,
}

impl<T> ListWindow<T> {
    fn empty(total: u64, filter: Filter) -> Self {
        Self {
            items: Vec::new(),
            total,
            first: None,
            last: None,
            is_start: total == 0,
            is_end: total == 0,
            filter,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

/// Load a window of `T` matching `filter`.
///
/// * `cursor == None, count > 0`: newest `count` items.
/// * `cursor == None, count < 0`: oldest `|count|` items.
/// * `cursor == Some(c), count > 0`: `count` items older than `c`.
/// * `cursor == Some(c), count < 0`: `|count|` items newer than `c`.
///
/// `count == 0` is rejected before the store is touched. A cursor that does
/// not resolve to an existing item yields [`PipelineError::CursorNotFound`].
pub async fn window<T: Document>(
    store: &dyn PersistentStore,
    filter: Filter,
    cursor: Option<Cursor>,
    count: i32,
) -> Result<ListWindow<T>, PipelineError> {
    if count == 0 {
        return Err(PipelineError::InvalidPageSize);
    }

    let total = store.count(T::COLLECTION, &filter).await?;
    debug!(collection = T::COLLECTION, total, "found filtered items");
    if total == 0 {
        return Ok(ListWindow::empty(0, filter));
    }

    let forward = count > 0;
    let mut list = ListWindow::empty(total, filter);

    // find the anchor key and whether it belongs to the page
    let (anchor, inclusive) = match cursor {
        None if forward => {
            list.is_start = true;
            (border_pk(store, T::COLLECTION, &list.filter, SortOrder::Desc).await?, true)
        }
        None => {
            list.is_end = true;
            (border_pk(store, T::COLLECTION, &list.filter, SortOrder::Asc).await?, true)
        }
        Some(c) => (resolve_cursor(store, T::COLLECTION, &list.filter, c).await?, false),
    };
    debug!(collection = T::COLLECTION, anchor, "list initialized");

    let op = match (forward, inclusive) {
        (true, true) => Op::Lte,
        (true, false) => Op::Lt,
        (false, true) => Op::Gte,
        (false, false) => Op::Gt,
    };
    let range = list.filter.clone().with(PK_FIELD, op, anchor);

    // try to get one more row so we can detect the far boundary
    let size = u64::from(count.unsigned_abs());
    let order = if forward { SortOrder::Desc } else { SortOrder::Asc };
    let options = FindOptions::new().sort(PK_FIELD, order).limit(size + 1);
    let mut rows = store.find(T::COLLECTION, &range, &options).await?;

    if rows.len() as u64 > size {
        rows.truncate(size as usize);
    } else if forward {
        list.is_end = true;
    } else {
        list.is_start = true;
    }

    let mut items = rows
        .into_iter()
        .map(T::from_document)
        .collect::<Result<Vec<T>, _>>()?;

    // keep newest on top regardless of the paging direction
    if !forward {
        items.reverse();
    }

    list.first = items.first().map(|i| Cursor(i.pk()));
    list.last = items.last().map(|i| Cursor(i.pk()));
    list.items = items;
    Ok(list)
}

/// Primary key of the newest (`Desc`) or oldest (`Asc`) item under `filter`.
async fn border_pk(
    store: &dyn PersistentStore,
    collection: &str,
    filter: &Filter,
    order: SortOrder,
) -> Result<u64, PipelineError> {
    let rows = store
        .find(collection, filter, &FindOptions::new().sort(PK_FIELD, order).limit(1))
        .await?;
    rows.first()
        .and_then(|r| r.get(PK_FIELD))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| {
            PipelineError::Storage(format!("can not find the initial item of {collection}"))
        })
}

/// The cursor must name an item that also passes the list filter.
async fn resolve_cursor(
    store: &dyn PersistentStore,
    collection: &str,
    filter: &Filter,
    cursor: Cursor,
) -> Result<u64, PipelineError> {
    let found = store
        .count(collection, &filter.clone().with(PK_FIELD, Op::Eq, cursor.key()))
        .await?;
    if found == 0 {
        return Err(PipelineError::CursorNotFound(cursor.to_string()));
    }
    Ok(cursor.key())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
