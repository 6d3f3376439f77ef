use super::builder::sort_folder_queue_entries;
use super::{ArticlePreview, FolderQueueEntry};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_ms: i64,
    pub max_items: usize,
}

impl RetentionPolicy {
    pub fn from_days(max_age_days: i64, max_items: usize) -> Self {
        Self {
            max_age_ms: max_age_days.saturating_mul(DAY_MS),
            max_items,
        }
    }

    /// Caches last synced before this window are treated as never synced.
    pub fn stale_sync_window_ms(&self) -> i64 {
        self.max_age_ms.saturating_mul(2)
    }

    pub fn is_fresh(&self, stored_at: i64, now: i64) -> bool {
        now.saturating_sub(stored_at) <= self.max_age_ms
    }
}

/// Keeps previews stored within the age window, then the first `max_items` of them.
/// Input is expected newest-first already.
pub fn prune_article_previews(
    articles: &[ArticlePreview],
    now: i64,
    policy: &RetentionPolicy,
) -> Vec<ArticlePreview> {
    articles
        .iter()
        .filter(|article| policy.is_fresh(article.stored_at, now))
        .take(policy.max_items)
        .cloned()
        .collect()
}

/// Prunes every entry, drops the ones left without unread articles and
/// returns the survivors in queue order.
pub fn prune_folders<I>(folders: I, now: i64, policy: &RetentionPolicy) -> Vec<FolderQueueEntry>
where
    I: IntoIterator<Item = FolderQueueEntry>,
{
    let mut kept: Vec<FolderQueueEntry> = folders
        .into_iter()
        .filter_map(|mut entry| {
            entry.articles = prune_article_previews(&entry.articles, now, policy);
            entry.refresh_unread_count();
            (entry.unread_count > 0).then_some(entry)
        })
        .collect();
    sort_folder_queue_entries(&mut kept);
    kept
}
