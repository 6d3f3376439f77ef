use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::retention::{prune_article_previews, RetentionPolicy};
use super::{
    sort_articles_newest_first, ArticlePreview, FolderQueueEntry, QueueStatus,
    UNCATEGORIZED_FOLDER_ID, UNCATEGORIZED_FOLDER_NAME,
};
use crate::core::feed::types::Folder;

#[derive(Debug, Clone)]
pub struct BuildOptions<'a> {
    pub existing_entries: &'a BTreeMap<i64, FolderQueueEntry>,
    /// Folders skipped since the last reconciliation; they stay skipped even
    /// when fresh articles arrive.
    pub pending_skip_folder_ids: &'a BTreeSet<i64>,
    pub now: i64,
    pub policy: RetentionPolicy,
}

/// Fresh remote content for one folder, before it is merged with the cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshFolder {
    pub id: i64,
    pub name: Option<String>,
    pub articles: Vec<ArticlePreview>,
}

pub fn build_folder_queue_from_articles(
    folders: &[Folder],
    articles: Vec<ArticlePreview>,
    options: &BuildOptions<'_>,
) -> Vec<FolderQueueEntry> {
    let mut grouped = group_articles_by_folder(articles);
    for folder in folders {
        grouped.entry(folder.id).or_default();
    }
    let names: BTreeMap<i64, &str> = folders
        .iter()
        .map(|folder| (folder.id, folder.name.as_str()))
        .collect();

    let mut entries: Vec<FolderQueueEntry> = grouped
        .into_iter()
        .filter_map(|(id, folder_articles)| {
            let fresh = FreshFolder {
                id,
                name: names.get(&id).map(|name| (*name).to_string()),
                articles: folder_articles,
            };
            let pinned = options.pending_skip_folder_ids.contains(&id);
            let mut entry =
                merge_folder_entry(options.existing_entries.get(&id), fresh, pinned, options.now);
            entry.articles = prune_article_previews(&entry.articles, options.now, &options.policy);
            entry.refresh_unread_count();
            (entry.unread_count > 0).then_some(entry)
        })
        .collect();

    sort_folder_queue_entries(&mut entries);
    entries
}

/// Combines a cached entry with fresh content. Only `status` and `sort_order`
/// survive from the cached side, and a skipped folder returns to the queue
/// once it receives an unread article it did not hold before.
pub fn merge_folder_entry(
    existing: Option<&FolderQueueEntry>,
    fresh: FreshFolder,
    keep_skipped: bool,
    now: i64,
) -> FolderQueueEntry {
    let mut articles = fresh.articles;
    sort_articles_newest_first(&mut articles);

    let name = fresh
        .name
        .or_else(|| existing.map(|entry| entry.name.clone()))
        .unwrap_or_else(|| default_folder_name(fresh.id));

    let (status, sort_order) = match existing {
        Some(previous) => {
            let status = match previous.status {
                QueueStatus::Skipped if !keep_skipped && has_new_unread(previous, &articles) => {
                    QueueStatus::Queued
                }
                QueueStatus::Skipped => QueueStatus::Skipped,
                _ => QueueStatus::Queued,
            };
            (status, previous.sort_order)
        }
        None => (QueueStatus::Queued, 0),
    };

    let mut entry = FolderQueueEntry {
        id: fresh.id,
        name,
        sort_order,
        status,
        unread_count: 0,
        articles,
        last_updated: now,
    };
    entry.refresh_unread_count();
    entry
}

/// Puts skipped folders last; otherwise more unread first, then name
/// (case-insensitive), then id. Rewrites `sort_order` to the final position.
pub fn sort_folder_queue_entries(entries: &mut [FolderQueueEntry]) {
    entries.sort_by(compare_queue_entries);
    for (position, entry) in entries.iter_mut().enumerate() {
        entry.sort_order = position as i64;
    }
}

pub fn compare_queue_entries(left: &FolderQueueEntry, right: &FolderQueueEntry) -> Ordering {
    left.is_skipped()
        .cmp(&right.is_skipped())
        .then_with(|| right.unread_count.cmp(&left.unread_count))
        .then_with(|| left.name.to_lowercase().cmp(&right.name.to_lowercase()))
        .then_with(|| left.id.cmp(&right.id))
}

/// The one rule for the active folder: keep `current` while it is queued in
/// `entries`, otherwise take the first non-skipped entry in queue order.
pub fn select_active_folder_id(entries: &[FolderQueueEntry], current: Option<i64>) -> Option<i64> {
    let still_valid = current.filter(|id| {
        entries
            .iter()
            .any(|entry| entry.id == *id && !entry.is_skipped())
    });
    still_valid.or_else(|| {
        entries
            .iter()
            .find(|entry| !entry.is_skipped())
            .map(|entry| entry.id)
    })
}

pub fn default_folder_name(id: i64) -> String {
    if id == UNCATEGORIZED_FOLDER_ID {
        UNCATEGORIZED_FOLDER_NAME.to_string()
    } else {
        format!("Folder {id}")
    }
}

fn group_articles_by_folder(articles: Vec<ArticlePreview>) -> BTreeMap<i64, Vec<ArticlePreview>> {
    let mut seen = HashSet::new();
    let mut grouped = BTreeMap::<i64, Vec<ArticlePreview>>::new();
    for article in articles {
        if !seen.insert(article.id) {
            continue;
        }
        grouped.entry(article.folder_id).or_default().push(article);
    }
    grouped
}

fn has_new_unread(previous: &FolderQueueEntry, articles: &[ArticlePreview]) -> bool {
    let known: HashSet<i64> = previous.articles.iter().map(|article| article.id).collect();
    articles
        .iter()
        .any(|article| article.unread && !known.contains(&article.id))
}
