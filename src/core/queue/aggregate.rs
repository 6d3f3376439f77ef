use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use super::{ArticlePreview, FolderQueueEntry, UNCATEGORIZED_FOLDER_ID, UNCATEGORIZED_FOLDER_NAME};
use crate::core::feed::types::{Article, Feed, Folder};

/// Anything that can be counted as (un)read article of a feed.
pub trait UnreadItem {
    fn feed_id(&self) -> i64;
    fn own_folder_id(&self) -> Option<i64>;
    fn is_unread(&self) -> bool;
}

impl UnreadItem for Article {
    fn feed_id(&self) -> i64 {
        self.feed_id
    }

    fn own_folder_id(&self) -> Option<i64> {
        self.folder_id
    }

    fn is_unread(&self) -> bool {
        self.unread
    }
}

impl UnreadItem for ArticlePreview {
    fn feed_id(&self) -> i64 {
        self.feed_id
    }

    fn own_folder_id(&self) -> Option<i64> {
        Some(self.folder_id)
    }

    fn is_unread(&self) -> bool {
        self.unread
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UnreadCounts {
    pub total: usize,
    pub by_feed: BTreeMap<i64, usize>,
    pub by_folder: BTreeMap<i64, usize>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FolderSummary {
    pub id: i64,
    pub name: String,
    pub unread_count: usize,
    pub feed_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderProgress {
    pub current_folder_id: Option<i64>,
    pub next_folder_id: Option<i64>,
    pub remaining_folder_ids: Vec<i64>,
    pub all_viewed: bool,
}

/// Feed id to parent folder id. Feeds at the root map to the uncategorized sentinel.
pub fn build_feed_folder_lookup(feeds: &[Feed]) -> HashMap<i64, i64> {
    feeds
        .iter()
        .map(|feed| (feed.id, feed.folder_id.unwrap_or(UNCATEGORIZED_FOLDER_ID)))
        .collect()
}

pub fn resolve_folder_id(
    own_folder_id: Option<i64>,
    feed_id: i64,
    feed_folders: &HashMap<i64, i64>,
) -> i64 {
    own_folder_id
        .or_else(|| feed_folders.get(&feed_id).copied())
        .unwrap_or(UNCATEGORIZED_FOLDER_ID)
}

pub fn count_unread_by_feed<'a, T, I>(articles: I) -> BTreeMap<i64, usize>
where
    T: UnreadItem + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut counts = BTreeMap::new();
    for article in articles.into_iter().filter(|article| article.is_unread()) {
        *counts.entry(article.feed_id()).or_insert(0) += 1;
    }
    counts
}

pub fn count_unread_by_folder<'a, T, I>(
    articles: I,
    feed_folders: &HashMap<i64, i64>,
) -> BTreeMap<i64, usize>
where
    T: UnreadItem + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut counts = BTreeMap::new();
    for article in articles.into_iter().filter(|article| article.is_unread()) {
        let folder_id = resolve_folder_id(article.own_folder_id(), article.feed_id(), feed_folders);
        *counts.entry(folder_id).or_insert(0) += 1;
    }
    counts
}

pub fn aggregate_unread_counts<T: UnreadItem>(articles: &[T], feeds: &[Feed]) -> UnreadCounts {
    let lookup = build_feed_folder_lookup(feeds);
    let by_feed = count_unread_by_feed(articles);
    let by_folder = count_unread_by_folder(articles, &lookup);
    UnreadCounts {
        total: by_feed.values().sum(),
        by_feed,
        by_folder,
    }
}

/// Folders with their derived unread count and member feeds. An uncategorized
/// row is appended when root feeds or unread counts exist for it.
pub fn summarize_folders<T: UnreadItem>(
    folders: &[Folder],
    feeds: &[Feed],
    articles: &[T],
) -> Vec<FolderSummary> {
    let lookup = build_feed_folder_lookup(feeds);
    let unread = count_unread_by_folder(articles, &lookup);
    let mut members = BTreeMap::<i64, BTreeSet<i64>>::new();
    for (feed_id, folder_id) in &lookup {
        members.entry(*folder_id).or_default().insert(*feed_id);
    }

    let summarize = |id: i64, name: &str| FolderSummary {
        id,
        name: name.to_string(),
        unread_count: unread.get(&id).copied().unwrap_or(0),
        feed_ids: members
            .get(&id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default(),
    };

    let mut summaries: Vec<FolderSummary> = folders
        .iter()
        .map(|folder| summarize(folder.id, &folder.name))
        .collect();
    let has_root_content = members.contains_key(&UNCATEGORIZED_FOLDER_ID)
        || unread.contains_key(&UNCATEGORIZED_FOLDER_ID);
    if has_root_content && !folders.iter().any(|folder| folder.id == UNCATEGORIZED_FOLDER_ID) {
        summaries.push(summarize(UNCATEGORIZED_FOLDER_ID, UNCATEGORIZED_FOLDER_NAME));
    }
    summaries
}

pub fn total_unread(queue: &[FolderQueueEntry]) -> usize {
    queue.iter().map(|entry| entry.unread_count).sum()
}

pub fn derive_folder_progress(
    queue: &[FolderQueueEntry],
    current_folder_id: Option<i64>,
) -> FolderProgress {
    let position = current_folder_id
        .and_then(|current| queue.iter().position(|entry| entry.id == current));
    let start = position.map_or(0, |index| index + 1);
    let remaining_folder_ids: Vec<i64> = queue
        .iter()
        .skip(start)
        .map(|entry| entry.id)
        .collect();

    FolderProgress {
        current_folder_id,
        next_folder_id: remaining_folder_ids.first().copied(),
        remaining_folder_ids,
        all_viewed: queue.is_empty(),
    }
}
