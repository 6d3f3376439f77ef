use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub favicon_link: Option<String>,
    pub link: Option<String>,
    /// `None` (or the uncategorized sentinel) for feeds at the root.
    pub folder_id: Option<i64>,
    pub unread_count: Option<i64>,
    pub ordering: i64,
    pub pinned: bool,
    pub update_error_count: i64,
    pub last_update_error: Option<String>,
}

/// A remote item as returned by the Items API.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub guid: String,
    pub guid_hash: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    /// Seconds since epoch.
    pub pub_date: Option<i64>,
    pub body: Option<String>,
    pub enclosure_mime: Option<String>,
    pub enclosure_link: Option<String>,
    pub media_thumbnail: Option<String>,
    pub feed_id: i64,
    /// Set by callers that already know the folder; the API itself does not send it.
    pub folder_id: Option<i64>,
    pub unread: bool,
    pub starred: bool,
    pub last_modified: Option<i64>,
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemType {
    Feed,
    Folder,
    Starred,
    #[default]
    All,
}

impl ItemType {
    pub fn as_param(self) -> u8 {
        match self {
            Self::Feed => 0,
            Self::Folder => 1,
            Self::Starred => 2,
            Self::All => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemQuery {
    /// `-1` asks for everything in one response.
    pub batch_size: i64,
    /// Only items with an id below this one are returned; `0` starts at the newest.
    pub offset: i64,
    pub item_type: ItemType,
    pub id: i64,
    pub get_read: bool,
    pub oldest_first: bool,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            batch_size: -1,
            offset: 0,
            item_type: ItemType::All,
            id: 0,
            get_read: true,
            oldest_first: false,
        }
    }
}

impl ItemQuery {
    pub fn unread_page(batch_size: i64, offset: i64) -> Self {
        Self {
            batch_size,
            offset,
            get_read: false,
            ..Self::default()
        }
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("batchSize", self.batch_size.to_string()),
            ("offset", self.offset.to_string()),
            ("type", self.item_type.as_param().to_string()),
            ("id", self.id.to_string()),
            ("getRead", self.get_read.to_string()),
            ("oldestFirst", self.oldest_first.to_string()),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoldersResponse {
    #[serde(default)]
    pub folders: Vec<Folder>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedsResponse {
    pub feeds: Vec<Feed>,
    pub starred_count: Option<i64>,
    pub newest_item_id: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<Article>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkItemsReadRequest<'a> {
    pub item_ids: &'a [i64],
}
