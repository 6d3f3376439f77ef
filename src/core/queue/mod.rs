pub mod aggregate;
pub mod builder;
pub mod retention;

use serde::{Deserialize, Serialize};

/// Folder id used for feeds without a parent folder.
pub const UNCATEGORIZED_FOLDER_ID: i64 = 0;
pub const UNCATEGORIZED_FOLDER_NAME: &str = "Uncategorized";

/// Only `Queued` and `Skipped` are ever written. `Active` and `Completed` are
/// accepted when reading older envelopes and folded to `Queued` on normalize;
/// the active folder is tracked by `activeFolderId` alone.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Queued,
    Active,
    Skipped,
    Completed,
}

/// Storable, trimmed-down copy of a remote article.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ArticlePreview {
    pub id: i64,
    pub folder_id: i64,
    pub feed_id: i64,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    /// Seconds since epoch.
    pub pub_date: i64,
    pub unread: bool,
    pub starred: bool,
    pub has_full_text: bool,
    /// Milliseconds since epoch, written by the cache, never by the server.
    pub stored_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct FolderQueueEntry {
    pub id: i64,
    pub name: String,
    pub sort_order: i64,
    pub status: QueueStatus,
    pub unread_count: usize,
    pub articles: Vec<ArticlePreview>,
    pub last_updated: i64,
}

impl FolderQueueEntry {
    pub fn new(id: i64, name: impl Into<String>, articles: Vec<ArticlePreview>, now: i64) -> Self {
        let mut entry = Self {
            id,
            name: name.into(),
            sort_order: 0,
            status: QueueStatus::Queued,
            unread_count: 0,
            articles,
            last_updated: now,
        };
        entry.refresh_unread_count();
        entry
    }

    pub fn refresh_unread_count(&mut self) {
        self.unread_count = count_unread(&self.articles);
    }

    pub fn is_skipped(&self) -> bool {
        self.status == QueueStatus::Skipped
    }

    pub fn article_ids(&self) -> Vec<i64> {
        self.articles.iter().map(|article| article.id).collect()
    }
}

pub fn count_unread(articles: &[ArticlePreview]) -> usize {
    articles.iter().filter(|article| article.unread).count()
}

/// Newest first by publication date, article id breaking ties.
pub fn sort_articles_newest_first(articles: &mut [ArticlePreview]) {
    articles.sort_by(|left, right| {
        right
            .pub_date
            .cmp(&left.pub_date)
            .then_with(|| right.id.cmp(&left.id))
    });
}
