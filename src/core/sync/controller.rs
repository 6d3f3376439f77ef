use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::config::QueueConfig;
use crate::core::feed::client::{fetch_unread_articles, ApiError, NewsApi};
use crate::core::feed::preview::article_to_preview;
use crate::core::feed::types::{Article, Feed, Folder};
use crate::core::queue::aggregate::{
    build_feed_folder_lookup, derive_folder_progress, resolve_folder_id, total_unread,
    FolderProgress,
};
use crate::core::queue::builder::{
    build_folder_queue_from_articles, select_active_folder_id, sort_folder_queue_entries,
    BuildOptions,
};
use crate::core::queue::{ArticlePreview, FolderQueueEntry, QueueStatus, UNCATEGORIZED_FOLDER_ID};
use crate::core::storage::envelope::{TimelineCacheEnvelope, TimelineCacheStore};
use crate::core::storage::repository::KeyValueStore;

/// Milliseconds since epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("news api error: {0}")]
    Api(#[from] ApiError),
    #[error("folder {0} is not in the queue")]
    FolderNotFound(i64),
    #[error("queue still has folders to read")]
    NothingToRestart,
}

/// Remote data for one reconciliation pass. `None` marks a fetch that has not
/// finished yet.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub folders: Option<Vec<Folder>>,
    pub feeds: Option<Vec<Feed>>,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub queue: Vec<FolderQueueEntry>,
    pub active_folder: Option<FolderQueueEntry>,
    pub active_articles: Vec<ArticlePreview>,
    pub total_unread: usize,
    pub progress: FolderProgress,
    pub pending_read_ids: Vec<i64>,
    pub pending_skip_folder_ids: Vec<i64>,
    pub last_synced: i64,
    pub is_hydrated: bool,
    pub is_updating: bool,
    pub error: Option<String>,
}

struct ControllerState {
    envelope: TimelineCacheEnvelope,
    hydrated: bool,
    updating: bool,
    error: Option<String>,
    /// Read ids whose server call has not settled yet in this process.
    in_flight_reads: HashSet<i64>,
    /// Bumped each time the server confirms a batch of reads.
    read_epoch: u64,
    /// Confirmed read ids and the epoch they were confirmed in. Kept while a
    /// fetch that started before the confirmation is still open.
    confirmed_reads: HashMap<i64, u64>,
    /// Read epoch at the start of every refresh fetch still running.
    open_fetches: BTreeMap<u64, usize>,
}

impl ControllerState {
    fn open_fetch(&mut self) -> u64 {
        let epoch = self.read_epoch;
        *self.open_fetches.entry(epoch).or_default() += 1;
        epoch
    }

    fn close_fetch(&mut self, epoch: u64) {
        if let Some(count) = self.open_fetches.get_mut(&epoch) {
            *count -= 1;
            if *count == 0 {
                self.open_fetches.remove(&epoch);
            }
        }
    }

    /// Whether a fetch that started at `fetch_epoch` may still report `id` unread.
    fn read_locally(&self, id: i64, fetch_epoch: u64) -> bool {
        self.in_flight_reads.contains(&id)
            || self
                .confirmed_reads
                .get(&id)
                .is_some_and(|confirmed| *confirmed > fetch_epoch)
    }

    fn forget_settled_reads(&mut self) {
        let floor = self
            .open_fetches
            .keys()
            .next()
            .copied()
            .unwrap_or(self.read_epoch);
        self.confirmed_reads.retain(|_, confirmed| *confirmed > floor);
    }
}

/// Keeps the persisted folder queue in step with the server. Every
/// read-modify-store of the envelope happens under one lock; network calls
/// happen outside it.
pub struct FolderQueueController<S, A> {
    cache: TimelineCacheStore<S>,
    api: A,
    page_size: i64,
    clock: Clock,
    state: Mutex<ControllerState>,
}

impl<S, A> FolderQueueController<S, A>
where
    S: KeyValueStore,
    A: NewsApi,
{
    pub fn new(store: S, api: A, config: QueueConfig) -> Self {
        let page_size = config.page_size;
        let cache = TimelineCacheStore::new(store, config);
        let envelope = cache.create_empty();
        Self {
            cache,
            api,
            page_size,
            clock: Arc::new(system_now_ms),
            state: Mutex::new(ControllerState {
                envelope,
                hydrated: false,
                updating: false,
                error: None,
                in_flight_reads: HashSet::new(),
                read_epoch: 0,
                confirmed_reads: HashMap::new(),
                open_fetches: BTreeMap::new(),
            }),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cache(&self) -> &TimelineCacheStore<S> {
        &self.cache
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    async fn lock_hydrated(&self) -> MutexGuard<'_, ControllerState> {
        let mut state = self.state.lock().await;
        if !state.hydrated {
            state.envelope = self.cache.load(self.now()).await;
            state.hydrated = true;
            debug!(
                "hydrated timeline cache with {} folders",
                state.envelope.folders.len()
            );
        }
        state
    }

    pub async fn hydrate(&self) {
        drop(self.lock_hydrated().await);
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        let envelope = &state.envelope;
        let queue = envelope.queue();
        let active_folder = envelope.active_folder().cloned();
        QueueSnapshot {
            active_articles: active_folder
                .as_ref()
                .map(|entry| entry.articles.clone())
                .unwrap_or_default(),
            total_unread: total_unread(&queue),
            progress: derive_folder_progress(&queue, envelope.active_folder_id),
            pending_read_ids: envelope.pending_read_ids.iter().copied().collect(),
            pending_skip_folder_ids: envelope.pending_skip_folder_ids.iter().copied().collect(),
            last_synced: envelope.last_synced,
            is_hydrated: state.hydrated,
            is_updating: state.updating,
            error: state.error.clone(),
            queue,
            active_folder,
        }
    }

    /// Merges fresh remote data into the cached queue and persists it. The data
    /// is taken to be current as of this call.
    pub async fn reconcile(&self, remote: RemoteSnapshot) -> ReconcileOutcome {
        self.reconcile_fetched(remote, None).await
    }

    /// `fetch_epoch` is the read epoch the fetch behind `remote` started in;
    /// reads confirmed after it stay hidden.
    async fn reconcile_fetched(
        &self,
        remote: RemoteSnapshot,
        fetch_epoch: Option<u64>,
    ) -> ReconcileOutcome {
        let (Some(folders), Some(feeds)) = (remote.folders.as_deref(), remote.feeds.as_deref())
        else {
            debug!("folders or feeds still loading, skipping reconciliation");
            if let Some(epoch) = fetch_epoch {
                self.state.lock().await.close_fetch(epoch);
            }
            return ReconcileOutcome::Skipped;
        };

        let mut state = self.lock_hydrated().await;
        let fetch_epoch = match fetch_epoch {
            Some(epoch) => {
                state.close_fetch(epoch);
                epoch
            }
            None => state.read_epoch,
        };
        let now = self.now();
        let lookup = build_feed_folder_lookup(feeds);
        let previews: Vec<ArticlePreview> = remote
            .articles
            .iter()
            .map(|article| {
                let folder_id = resolve_folder_id(article.folder_id, article.feed_id, &lookup);
                let mut preview = article_to_preview(article, folder_id, now);
                if state.read_locally(preview.id, fetch_epoch) {
                    preview.unread = false;
                }
                preview
            })
            .collect();

        let previous = &state.envelope;
        let options = BuildOptions {
            existing_entries: &previous.folders,
            pending_skip_folder_ids: &previous.pending_skip_folder_ids,
            now,
            policy: self.cache.config().retention(),
        };
        let mut entries = build_folder_queue_from_articles(folders, previews, &options);

        let mut known: BTreeSet<i64> = folders.iter().map(|folder| folder.id).collect();
        known.insert(UNCATEGORIZED_FOLDER_ID);
        known.extend(entries.iter().map(|entry| entry.id));
        entries.extend(
            previous
                .folders
                .values()
                .filter(|entry| !known.contains(&entry.id))
                .cloned(),
        );
        sort_folder_queue_entries(&mut entries);

        let mut envelope = TimelineCacheEnvelope {
            version: previous.version,
            last_synced: now,
            active_folder_id: select_active_folder_id(&entries, previous.active_folder_id),
            folders: Default::default(),
            pending_read_ids: previous
                .pending_read_ids
                .iter()
                .copied()
                .filter(|id| state.in_flight_reads.contains(id))
                .collect(),
            pending_skip_folder_ids: BTreeSet::new(),
        };
        envelope.replace_folders(entries);

        state.envelope = self.cache.store(envelope, now).await;
        state.error = None;
        state.forget_settled_reads();
        info!(
            "reconciled {} articles into {} queued folders",
            remote.articles.len(),
            state.envelope.folders.len()
        );
        ReconcileOutcome::Applied
    }

    /// Fetches folders, feeds and unread items, then reconciles. On failure the
    /// cached queue is left untouched and the error is kept in the snapshot.
    pub async fn refresh(&self) -> Result<ReconcileOutcome, SyncError> {
        let fetch_epoch = {
            let mut state = self.lock_hydrated().await;
            state.updating = true;
            state.open_fetch()
        };

        let fetched = tokio::try_join!(
            self.api.get_folders(),
            self.api.get_feeds(),
            fetch_unread_articles(&self.api, self.page_size),
        );
        let outcome = match fetched {
            Ok((folders, feeds, articles)) => {
                let remote = RemoteSnapshot {
                    folders: Some(folders),
                    feeds: Some(feeds),
                    articles,
                };
                Ok(self.reconcile_fetched(remote, Some(fetch_epoch)).await)
            }
            Err(error) => {
                warn!("refresh failed, keeping cached queue: {error}");
                let mut state = self.state.lock().await;
                state.close_fetch(fetch_epoch);
                state.forget_settled_reads();
                state.error = Some(error.to_string());
                Err(SyncError::Api(error))
            }
        };

        self.state.lock().await.updating = false;
        outcome
    }

    /// Removes the folder from the queue right away and marks its articles read
    /// on the server. A failed call is returned as an error; the folder stays
    /// removed and its ids stay pending until a retry or the next refresh.
    pub async fn mark_folder_read(&self, folder_id: i64) -> Result<(), SyncError> {
        let ids = {
            let mut state = self.lock_hydrated().await;
            let now = self.now();
            let mut envelope = state.envelope.clone();
            let entry = envelope
                .folders
                .remove(&folder_id)
                .ok_or(SyncError::FolderNotFound(folder_id))?;
            let ids = entry.article_ids();
            envelope.pending_read_ids.extend(ids.iter().copied());
            state.in_flight_reads.extend(ids.iter().copied());
            state.envelope = self.cache.store(envelope, now).await;
            ids
        };

        let result = self.api.mark_items_read(&ids).await;
        self.settle_reads(&ids, result).await
    }

    /// Re-sends every pending read id that is not already in flight.
    pub async fn retry_pending_reads(&self) -> Result<usize, SyncError> {
        let ids: Vec<i64> = {
            let mut state = self.lock_hydrated().await;
            let ids: Vec<i64> = state
                .envelope
                .pending_read_ids
                .iter()
                .copied()
                .filter(|id| !state.in_flight_reads.contains(id))
                .collect();
            state.in_flight_reads.extend(ids.iter().copied());
            ids
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let result = self.api.mark_items_read(&ids).await;
        self.settle_reads(&ids, result).await?;
        Ok(ids.len())
    }

    async fn settle_reads(&self, ids: &[i64], result: Result<(), ApiError>) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        for id in ids {
            state.in_flight_reads.remove(id);
        }
        match result {
            Ok(()) => {
                if !state.open_fetches.is_empty() {
                    state.read_epoch += 1;
                    let epoch = state.read_epoch;
                    state
                        .confirmed_reads
                        .extend(ids.iter().map(|id| (*id, epoch)));
                }
                let now = self.now();
                let mut envelope = state.envelope.clone();
                envelope.pending_read_ids.retain(|id| !ids.contains(id));
                state.envelope = self.cache.store(envelope, now).await;
                Ok(())
            }
            Err(error) => {
                warn!("marking {} articles read failed: {error}", ids.len());
                Err(SyncError::Api(error))
            }
        }
    }

    /// Moves the folder behind every queued folder and advances the active
    /// folder. The skip stays pending until the next reconciliation honours it.
    pub async fn skip_folder(&self, folder_id: i64) -> Result<(), SyncError> {
        let mut state = self.lock_hydrated().await;
        let now = self.now();
        let mut envelope = state.envelope.clone();
        let entry = envelope
            .folders
            .get_mut(&folder_id)
            .ok_or(SyncError::FolderNotFound(folder_id))?;
        entry.status = QueueStatus::Skipped;
        envelope.pending_skip_folder_ids.insert(folder_id);
        state.envelope = self.cache.store(envelope, now).await;
        debug!("skipped folder {folder_id}");
        Ok(())
    }

    /// Requeues every folder once all of them have been skipped.
    pub async fn restart(&self) -> Result<(), SyncError> {
        let mut state = self.lock_hydrated().await;
        let envelope = &state.envelope;
        let all_skipped = !envelope.folders.is_empty()
            && envelope.folders.values().all(FolderQueueEntry::is_skipped);
        if !all_skipped {
            return Err(SyncError::NothingToRestart);
        }

        let now = self.now();
        let mut envelope = envelope.clone();
        for entry in envelope.folders.values_mut() {
            entry.status = QueueStatus::Queued;
        }
        envelope.pending_skip_folder_ids.clear();
        envelope.active_folder_id = None;
        state.envelope = self.cache.store(envelope, now).await;
        Ok(())
    }

    /// Drops the persisted cache and starts over empty.
    pub async fn clear(&self) {
        let mut state = self.lock_hydrated().await;
        self.cache.clear().await;
        state.envelope = self.cache.create_empty();
        state.in_flight_reads.clear();
        state.confirmed_reads.clear();
        state.error = None;
    }

    /// One background pass: resend unconfirmed reads first, since a
    /// successful refresh drops pending ids that are not in flight.
    pub async fn run_sync_cycle(&self) {
        if let Err(error) = self.retry_pending_reads().await {
            debug!("pending reads still unconfirmed: {error}");
        }
        if let Err(error) = self.refresh().await {
            debug!("background refresh failed: {error}");
        }
    }
}

/// Hydrates once, then runs [`FolderQueueController::run_sync_cycle`] every
/// `interval` until the handle is aborted.
pub fn spawn_refresh_loop<S, A>(
    controller: Arc<FolderQueueController<S, A>>,
    interval: Duration,
) -> JoinHandle<()>
where
    S: KeyValueStore + 'static,
    A: NewsApi + 'static,
{
    tokio::spawn(async move {
        controller.hydrate().await;
        loop {
            controller.run_sync_cycle().await;
            tokio::time::sleep(interval).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feed::types::ItemQuery;
    use crate::core::queue::retention::DAY_MS;
    use crate::core::storage::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use tokio::sync::Notify;

    const NOW: i64 = 1_800_000_000_000;

    #[derive(Default)]
    struct Gate {
        entered: Notify,
        release: Notify,
    }

    #[derive(Default)]
    struct FakeApi {
        folders: std::sync::Mutex<Vec<Folder>>,
        feeds: std::sync::Mutex<Vec<Feed>>,
        items: std::sync::Mutex<Vec<Article>>,
        marked: std::sync::Mutex<Vec<i64>>,
        fail_mark_read: AtomicBool,
        fail_fetch: AtomicBool,
        gate: Option<Gate>,
        fetch_gate: Option<Gate>,
    }

    impl FakeApi {
        fn gated() -> Self {
            Self {
                gate: Some(Gate::default()),
                ..Self::default()
            }
        }

        /// Holds `get_items` after it has read the item list.
        fn fetch_gated() -> Self {
            Self {
                fetch_gate: Some(Gate::default()),
                ..Self::default()
            }
        }

        fn set_remote(&self, folders: Vec<Folder>, feeds: Vec<Feed>, items: Vec<Article>) {
            *self.folders.lock().expect("lock") = folders;
            *self.feeds.lock().expect("lock") = feeds;
            *self.items.lock().expect("lock") = items;
        }

        fn marked(&self) -> Vec<i64> {
            self.marked.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl NewsApi for FakeApi {
        async fn get_items(&self, query: &ItemQuery) -> Result<Vec<Article>, ApiError> {
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(ApiError::Server(502));
            }
            let items: Vec<Article> = self
                .items
                .lock()
                .expect("lock")
                .iter()
                .filter(|item| query.get_read || item.unread)
                .filter(|item| query.offset == 0 || item.id < query.offset)
                .cloned()
                .collect();
            if let Some(gate) = &self.fetch_gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            Ok(items)
        }

        async fn mark_items_read(&self, ids: &[i64]) -> Result<(), ApiError> {
            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            if self.fail_mark_read.load(Ordering::SeqCst) {
                return Err(ApiError::Server(503));
            }
            self.marked.lock().expect("lock").extend_from_slice(ids);
            let mut items = self.items.lock().expect("lock");
            for item in items.iter_mut().filter(|item| ids.contains(&item.id)) {
                item.unread = false;
            }
            Ok(())
        }

        async fn get_folders(&self) -> Result<Vec<Folder>, ApiError> {
            Ok(self.folders.lock().expect("lock").clone())
        }

        async fn get_feeds(&self) -> Result<Vec<Feed>, ApiError> {
            Ok(self.feeds.lock().expect("lock").clone())
        }
    }

    fn folder(id: i64, name: &str) -> Folder {
        Folder {
            id,
            name: name.to_string(),
        }
    }

    fn feed(id: i64, folder_id: Option<i64>) -> Feed {
        Feed {
            id,
            title: format!("Feed {id}"),
            folder_id,
            ..Feed::default()
        }
    }

    fn article(id: i64, feed_id: i64) -> Article {
        Article {
            id,
            feed_id,
            title: Some(format!("Article {id}")),
            body: Some(format!("<p>Body {id}</p>")),
            pub_date: Some(1_700_000_000 + id),
            unread: true,
            ..Article::default()
        }
    }

    /// Engineering (id 1, feed 10) has three unread, Design (id 2, feed 20) two.
    fn two_folder_remote() -> (Vec<Folder>, Vec<Feed>, Vec<Article>) {
        (
            vec![folder(1, "Engineering"), folder(2, "Design")],
            vec![feed(10, Some(1)), feed(20, Some(2))],
            vec![
                article(101, 10),
                article(102, 10),
                article(103, 10),
                article(201, 20),
                article(202, 20),
            ],
        )
    }

    fn fixed_clock(now: Arc<AtomicI64>) -> Clock {
        Arc::new(move || now.load(Ordering::SeqCst))
    }

    fn controller_with(api: FakeApi) -> FolderQueueController<Arc<MemoryStore>, FakeApi> {
        FolderQueueController::new(Arc::new(MemoryStore::new()), api, QueueConfig::default())
            .with_clock(fixed_clock(Arc::new(AtomicI64::new(NOW))))
    }

    fn snapshot_of(folders: Vec<Folder>, feeds: Vec<Feed>, articles: Vec<Article>) -> RemoteSnapshot {
        RemoteSnapshot {
            folders: Some(folders),
            feeds: Some(feeds),
            articles,
        }
    }

    fn queue_ids(snapshot: &QueueSnapshot) -> Vec<i64> {
        snapshot.queue.iter().map(|entry| entry.id).collect()
    }

    #[tokio::test]
    async fn marking_first_folder_read_advances_to_next() {
        let api = FakeApi::default();
        let (folders, feeds, items) = two_folder_remote();
        api.set_remote(folders, feeds, items);
        let controller = controller_with(api);

        controller.refresh().await.expect("refresh should succeed");
        let before = controller.snapshot().await;
        assert_eq!(queue_ids(&before), vec![1, 2]);
        assert_eq!(before.active_folder.as_ref().map(|entry| entry.id), Some(1));
        assert_eq!(before.total_unread, 5);
        assert_eq!(before.progress.next_folder_id, Some(2));

        controller
            .mark_folder_read(1)
            .await
            .expect("mark read should succeed");
        let after = controller.snapshot().await;

        assert_eq!(queue_ids(&after), vec![2]);
        assert_eq!(after.active_folder.map(|entry| entry.id), Some(2));
        assert_eq!(after.active_articles.len(), 2);
        assert!(after.pending_read_ids.is_empty());
        assert_eq!(controller.api().marked(), vec![103, 102, 101]);
    }

    #[tokio::test]
    async fn pending_reads_are_visible_until_the_server_answers() {
        let controller = Arc::new(controller_with(FakeApi::gated()));
        let outcome = controller
            .reconcile(snapshot_of(
                vec![folder(10, "News")],
                vec![feed(5, Some(10))],
                vec![article(1, 5), article(2, 5)],
            ))
            .await;
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let task = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.mark_folder_read(10).await }
        });
        let gate = controller.api().gate.as_ref().expect("gate should exist");
        gate.entered.notified().await;

        let during = controller.snapshot().await;
        assert_eq!(during.pending_read_ids, vec![1, 2]);
        assert!(!queue_ids(&during).contains(&10));
        assert_eq!(during.active_folder, None);

        gate.release.notify_one();
        task.await
            .expect("task should join")
            .expect("mark read should succeed");
        assert!(controller.snapshot().await.pending_read_ids.is_empty());
    }

    #[tokio::test]
    async fn reconcile_during_in_flight_read_keeps_folder_removed() {
        let controller = Arc::new(controller_with(FakeApi::gated()));
        let remote = || {
            snapshot_of(
                vec![folder(1, "Engineering"), folder(2, "Design")],
                vec![feed(10, Some(1)), feed(20, Some(2))],
                vec![article(101, 10), article(102, 10), article(201, 20)],
            )
        };
        controller.reconcile(remote()).await;

        let task = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.mark_folder_read(1).await }
        });
        let gate = controller.api().gate.as_ref().expect("gate should exist");
        gate.entered.notified().await;

        controller.reconcile(remote()).await;
        let raced = controller.snapshot().await;
        assert_eq!(queue_ids(&raced), vec![2]);
        assert_eq!(raced.active_folder.map(|entry| entry.id), Some(2));

        gate.release.notify_one();
        task.await
            .expect("task should join")
            .expect("mark read should succeed");
    }

    #[tokio::test]
    async fn failed_mark_read_keeps_optimistic_state_and_pending_ids() {
        let api = FakeApi::default();
        api.fail_mark_read.store(true, Ordering::SeqCst);
        let (folders, feeds, items) = two_folder_remote();
        api.set_remote(folders, feeds, items);
        let controller = controller_with(api);
        controller.refresh().await.expect("refresh should succeed");

        let error = controller
            .mark_folder_read(1)
            .await
            .expect_err("mark read should fail");
        assert!(matches!(error, SyncError::Api(ApiError::Server(503))));

        let after = controller.snapshot().await;
        assert_eq!(queue_ids(&after), vec![2]);
        assert_eq!(after.pending_read_ids, vec![101, 102, 103]);

        controller.api().fail_mark_read.store(false, Ordering::SeqCst);
        let retried = controller
            .retry_pending_reads()
            .await
            .expect("retry should succeed");
        assert_eq!(retried, 3);
        assert!(controller.snapshot().await.pending_read_ids.is_empty());
    }

    #[tokio::test]
    async fn unconfirmed_reads_reappear_after_next_refresh() {
        let api = FakeApi::default();
        api.fail_mark_read.store(true, Ordering::SeqCst);
        let (folders, feeds, items) = two_folder_remote();
        api.set_remote(folders, feeds, items);
        let controller = controller_with(api);
        controller.refresh().await.expect("refresh should succeed");
        let _ = controller.mark_folder_read(1).await;

        controller.refresh().await.expect("refresh should succeed");
        let after = controller.snapshot().await;

        assert_eq!(queue_ids(&after), vec![1, 2]);
        assert!(after.pending_read_ids.is_empty());
        assert_eq!(after.active_folder.map(|entry| entry.id), Some(2));
    }

    #[tokio::test]
    async fn skipping_only_folder_then_restart_requeues_it() {
        let controller = controller_with(FakeApi::default());
        controller
            .reconcile(snapshot_of(
                vec![folder(4, "Solo")],
                vec![feed(40, Some(4))],
                vec![article(1, 40)],
            ))
            .await;

        controller.skip_folder(4).await.expect("skip should succeed");
        let skipped = controller.snapshot().await;
        assert_eq!(skipped.active_folder, None);
        assert_eq!(skipped.queue[0].status, QueueStatus::Skipped);
        assert_eq!(skipped.pending_skip_folder_ids, vec![4]);

        controller.restart().await.expect("restart should succeed");
        let restarted = controller.snapshot().await;
        assert_eq!(restarted.queue[0].status, QueueStatus::Queued);
        assert_eq!(restarted.active_folder.map(|entry| entry.id), Some(4));
        assert!(restarted.pending_skip_folder_ids.is_empty());
    }

    #[tokio::test]
    async fn skip_moves_folder_to_the_end() {
        let controller = controller_with(FakeApi::default());
        let (folders, feeds, items) = two_folder_remote();
        controller.reconcile(snapshot_of(folders, feeds, items)).await;

        controller.skip_folder(1).await.expect("skip should succeed");
        let snapshot = controller.snapshot().await;

        assert_eq!(queue_ids(&snapshot), vec![2, 1]);
        assert_eq!(snapshot.active_folder.map(|entry| entry.id), Some(2));
        assert_eq!(snapshot.queue[1].sort_order, 1);
        assert!(matches!(
            controller.restart().await,
            Err(SyncError::NothingToRestart)
        ));
    }

    #[tokio::test]
    async fn skipped_folder_returns_only_with_new_articles() {
        let controller = controller_with(FakeApi::default());
        let (folders, feeds, items) = two_folder_remote();
        controller
            .reconcile(snapshot_of(folders.clone(), feeds.clone(), items.clone()))
            .await;
        controller.skip_folder(1).await.expect("skip should succeed");

        controller
            .reconcile(snapshot_of(folders.clone(), feeds.clone(), items.clone()))
            .await;
        let settled = controller.snapshot().await;
        assert_eq!(settled.queue[1].status, QueueStatus::Skipped);
        assert!(settled.pending_skip_folder_ids.is_empty());

        let mut grown = items;
        grown.push(article(104, 10));
        controller.reconcile(snapshot_of(folders, feeds, grown)).await;
        let requeued = controller.snapshot().await;
        assert_eq!(queue_ids(&requeued), vec![1, 2]);
        assert!(requeued.queue.iter().all(|entry| entry.status == QueueStatus::Queued));
        assert_eq!(requeued.active_folder.map(|entry| entry.id), Some(2));
    }

    #[tokio::test]
    async fn reconcile_is_skipped_while_metadata_is_loading() {
        let controller = controller_with(FakeApi::default());
        let outcome = controller
            .reconcile(RemoteSnapshot {
                folders: Some(vec![folder(1, "Engineering")]),
                feeds: None,
                articles: vec![article(1, 10)],
            })
            .await;

        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert!(controller.snapshot().await.queue.is_empty());
    }

    #[tokio::test]
    async fn refresh_failure_keeps_last_good_queue() {
        let api = FakeApi::default();
        let (folders, feeds, items) = two_folder_remote();
        api.set_remote(folders, feeds, items);
        let controller = controller_with(api);
        controller.refresh().await.expect("refresh should succeed");

        controller.api().fail_fetch.store(true, Ordering::SeqCst);
        let error = controller.refresh().await.expect_err("refresh should fail");
        assert!(matches!(error, SyncError::Api(ApiError::Server(502))));

        let snapshot = controller.snapshot().await;
        assert_eq!(queue_ids(&snapshot), vec![1, 2]);
        assert!(snapshot.error.is_some());
        assert!(!snapshot.is_updating);

        controller.api().fail_fetch.store(false, Ordering::SeqCst);
        controller.refresh().await.expect("refresh should succeed");
        assert_eq!(controller.snapshot().await.error, None);
    }

    #[tokio::test]
    async fn hydration_restores_state_from_storage() {
        let store = Arc::new(MemoryStore::new());
        let clock = fixed_clock(Arc::new(AtomicI64::new(NOW)));
        let first = FolderQueueController::new(Arc::clone(&store), FakeApi::default(), QueueConfig::default())
            .with_clock(Arc::clone(&clock));
        let (folders, feeds, items) = two_folder_remote();
        first.reconcile(snapshot_of(folders, feeds, items)).await;
        first.skip_folder(1).await.expect("skip should succeed");

        let second = FolderQueueController::new(store, FakeApi::default(), QueueConfig::default())
            .with_clock(clock);
        assert!(!second.snapshot().await.is_hydrated);
        second.hydrate().await;
        let restored = second.snapshot().await;

        assert!(restored.is_hydrated);
        assert_eq!(queue_ids(&restored), vec![2, 1]);
        assert_eq!(restored.active_folder.map(|entry| entry.id), Some(2));
        assert_eq!(restored.last_synced, NOW);
    }

    #[tokio::test]
    async fn aged_cache_is_pruned_on_hydration() {
        let store = Arc::new(MemoryStore::new());
        let now = Arc::new(AtomicI64::new(NOW));
        let first = FolderQueueController::new(Arc::clone(&store), FakeApi::default(), QueueConfig::default())
            .with_clock(fixed_clock(Arc::clone(&now)));
        let (folders, feeds, items) = two_folder_remote();
        first.reconcile(snapshot_of(folders, feeds, items)).await;

        now.store(NOW + 31 * DAY_MS, Ordering::SeqCst);
        let second = FolderQueueController::new(store, FakeApi::default(), QueueConfig::default())
            .with_clock(fixed_clock(now));
        second.hydrate().await;
        let restored = second.snapshot().await;

        assert!(restored.queue.is_empty());
        assert_eq!(restored.active_folder, None);
        assert!(restored.progress.all_viewed);
    }

    #[tokio::test]
    async fn cached_folder_missing_from_remote_survives_until_pruned() {
        let controller = controller_with(FakeApi::default());
        let (folders, feeds, items) = two_folder_remote();
        controller.reconcile(snapshot_of(folders, feeds, items)).await;

        controller
            .reconcile(snapshot_of(
                vec![folder(2, "Design")],
                vec![feed(20, Some(2))],
                vec![article(201, 20)],
            ))
            .await;
        let snapshot = controller.snapshot().await;

        assert_eq!(queue_ids(&snapshot), vec![1, 2]);
        assert_eq!(snapshot.queue[1].unread_count, 1);
    }

    #[tokio::test]
    async fn root_feeds_land_in_uncategorized_folder() {
        let controller = controller_with(FakeApi::default());
        controller
            .reconcile(snapshot_of(vec![], vec![feed(30, None)], vec![article(1, 30), article(2, 404)]))
            .await;
        let snapshot = controller.snapshot().await;

        assert_eq!(queue_ids(&snapshot), vec![UNCATEGORIZED_FOLDER_ID]);
        assert_eq!(snapshot.queue[0].unread_count, 2);
    }

    #[tokio::test]
    async fn unknown_folder_operations_fail() {
        let controller = controller_with(FakeApi::default());
        assert!(matches!(
            controller.mark_folder_read(77).await,
            Err(SyncError::FolderNotFound(77))
        ));
        assert!(matches!(
            controller.skip_folder(77).await,
            Err(SyncError::FolderNotFound(77))
        ));
        assert!(matches!(
            controller.restart().await,
            Err(SyncError::NothingToRestart)
        ));
    }

    #[tokio::test]
    async fn clear_drops_persisted_queue() {
        let controller = controller_with(FakeApi::default());
        let (folders, feeds, items) = two_folder_remote();
        controller.reconcile(snapshot_of(folders, feeds, items)).await;

        controller.clear().await;

        assert!(controller.snapshot().await.queue.is_empty());
        let stored = controller
            .cache()
            .backend()
            .get(&QueueConfig::default().storage_key)
            .await
            .expect("get should succeed");
        assert_eq!(stored, None);
    }

    #[tokio::test]
    async fn refresh_loop_populates_queue_in_background() {
        let api = FakeApi::default();
        let (folders, feeds, items) = two_folder_remote();
        api.set_remote(folders, feeds, items);
        let controller = Arc::new(controller_with(api));

        let handle = spawn_refresh_loop(Arc::clone(&controller), Duration::from_secs(3600));
        for _ in 0..100 {
            if !controller.snapshot().await.queue.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        handle.abort();

        let snapshot = controller.snapshot().await;
        assert!(snapshot.is_hydrated);
        assert_eq!(queue_ids(&snapshot), vec![1, 2]);
    }

    #[tokio::test]
    async fn refresh_fetched_before_confirmed_read_keeps_folder_removed() {
        let api = FakeApi::fetch_gated();
        let (folders, feeds, items) = two_folder_remote();
        api.set_remote(folders.clone(), feeds.clone(), items.clone());
        let controller = Arc::new(controller_with(api));
        controller.reconcile(snapshot_of(folders, feeds, items)).await;

        let refresh = tokio::spawn({
            let controller = Arc::clone(&controller);
            async move { controller.refresh().await }
        });
        let gate = controller
            .api()
            .fetch_gate
            .as_ref()
            .expect("fetch gate should exist");
        gate.entered.notified().await;

        controller
            .mark_folder_read(1)
            .await
            .expect("mark read should succeed");
        assert_eq!(queue_ids(&controller.snapshot().await), vec![2]);

        gate.release.notify_one();
        refresh
            .await
            .expect("task should join")
            .expect("refresh should succeed");
        let raced = controller.snapshot().await;
        assert_eq!(queue_ids(&raced), vec![2]);
        assert_eq!(raced.active_folder.map(|entry| entry.id), Some(2));
        assert!(raced.pending_read_ids.is_empty());

        gate.release.notify_one();
        controller.refresh().await.expect("refresh should succeed");
        assert_eq!(queue_ids(&controller.snapshot().await), vec![2]);
    }

    #[tokio::test]
    async fn sync_cycle_resends_reads_left_from_previous_session() {
        let store = Arc::new(MemoryStore::new());
        let clock = fixed_clock(Arc::new(AtomicI64::new(NOW)));
        let (folders, feeds, items) = two_folder_remote();

        let failing = FakeApi::default();
        failing.fail_mark_read.store(true, Ordering::SeqCst);
        failing.set_remote(folders.clone(), feeds.clone(), items.clone());
        let first = FolderQueueController::new(Arc::clone(&store), failing, QueueConfig::default())
            .with_clock(Arc::clone(&clock));
        first.refresh().await.expect("refresh should succeed");
        let _ = first.mark_folder_read(1).await;

        let api = FakeApi::default();
        api.set_remote(folders, feeds, items);
        let second = FolderQueueController::new(store, api, QueueConfig::default())
            .with_clock(clock);
        second.hydrate().await;
        assert_eq!(second.snapshot().await.pending_read_ids, vec![101, 102, 103]);

        second.run_sync_cycle().await;
        let after = second.snapshot().await;

        assert_eq!(second.api().marked(), vec![101, 102, 103]);
        assert_eq!(queue_ids(&after), vec![2]);
        assert!(after.pending_read_ids.is_empty());
        assert_eq!(after.error, None);
    }

    #[tokio::test]
    async fn snapshot_serializes_with_camel_case_keys() {
        let controller = controller_with(FakeApi::default());
        let (folders, feeds, items) = two_folder_remote();
        controller.reconcile(snapshot_of(folders, feeds, items)).await;

        let value = serde_json::to_value(controller.snapshot().await)
            .expect("snapshot should serialize");

        assert_eq!(value["isHydrated"], serde_json::json!(true));
        assert_eq!(value["activeFolder"]["id"], serde_json::json!(1));
        assert_eq!(value["progress"]["nextFolderId"], serde_json::json!(2));
        assert_eq!(value["pendingReadIds"], serde_json::json!([]));
        assert!(value.get("is_hydrated").is_none());
        assert!(value.get("total_unread").is_none());
    }
}
