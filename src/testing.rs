//! In-memory store and scripted collaborators for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::sync::Arc;
use sqlx::types::Json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::domain::twitter::{
    NewPost, NewThread, Post, PostStatus, PostedMetadata, Thread, ThreadProgress, ThreadStatus,
    ThreadWithPosts,
};
use crate::domain::{Account, AccountStatus, Branding, PersonaCatalog};
use crate::engine::decomposer::ThreadDecomposer;
use crate::engine::executor::{ExecutorConfig, PostingExecutor};
use crate::engine::orchestrator::{Components, Orchestrator, OrchestratorPolicy};
use crate::engine::pipeline::{PipelineLimits, PipelineManager};
use crate::engine::quality::QualityGate;
use crate::engine::rotator::{PersonaRotator, RotationPolicy};
use crate::engine::scheduler::SlotScheduler;
use crate::error::{GenerationError, PublishError, StoreError, StoreResult};
use crate::services::{
    ContentGenerator, GeneratedContent, GenerationRequest, PublishRequest, Published, Publisher,
};
use crate::store::{PostFilter, SegmentOutcome, ThreadFilter, TweetStore};

pub fn account(id: i64) -> Account {
    Account {
        id,
        display_name: format!("Account {}", id),
        handle: format!("acct{}", id),
        status: AccountStatus::Active,
        personas: Vec::new(),
        branding: Json(Branding {
            threads_enabled: true,
            ..Branding::default()
        }),
        min_pipeline_depth: None,
        max_pipeline_depth: None,
        created_at: Utc::now(),
    }
}

#[derive(Default)]
struct Inner {
    accounts: Vec<Account>,
    posts: BTreeMap<i64, Post>,
    threads: BTreeMap<i64, Thread>,
    next_post_id: i64,
    next_thread_id: i64,
}

impl Inner {
    fn insert_post(&mut self, new: NewPost) -> Post {
        self.next_post_id += 1;
        let post = Post {
            id: self.next_post_id,
            account_id: new.account_id,
            content: new.content,
            hashtags: new.hashtags,
            persona_key: new.persona_key,
            topic_key: new.topic_key,
            thread_id: new.thread_id,
            sequence: new.sequence,
            parent_external_id: None,
            status: new.status,
            scheduled_at: new.scheduled_at,
            posted_at: None,
            external_id: None,
            external_url: None,
            error_message: None,
            quality: new.quality.map(Json),
            attempt: new.attempt,
            retry_of: new.retry_of,
            claimed_at: None,
            created_at: Utc::now(),
        };
        self.posts.insert(post.id, post.clone());
        post
    }

    fn mark_posted(&mut self, post_id: i64, meta: &PostedMetadata) -> bool {
        match self.posts.get_mut(&post_id) {
            Some(p) if !p.status.is_terminal() => {
                p.status = PostStatus::Posted;
                p.posted_at = Some(meta.posted_at);
                p.external_id = Some(meta.external_id.clone());
                p.external_url = meta.external_url.clone();
                p.parent_external_id = meta.parent_external_id.clone();
                p.error_message = None;
                p.claimed_at = None;
                true
            }
            _ => false,
        }
    }

    fn mark_failed(&mut self, post_id: i64, error: &str) -> bool {
        match self.posts.get_mut(&post_id) {
            Some(p) if !p.status.is_terminal() => {
                p.status = PostStatus::Failed;
                p.error_message = Some(error.to_string());
                p.claimed_at = None;
                true
            }
            _ => false,
        }
    }
}

/// [`TweetStore`] over in-process maps, mirroring the SQL semantics.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    recording_down: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: Vec<Account>) -> Self {
        let store = Self::default();
        store.lock().accounts = accounts;
        store
    }

    /// Make every publish-result write fail as if the database went away.
    pub fn fail_recording(&self) {
        self.recording_down.store(true, Ordering::SeqCst);
    }

    fn recording(&self) -> StoreResult<()> {
        if self.recording_down.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn post(&self, id: i64) -> Post {
        self.lock().posts[&id].clone()
    }

    pub fn thread(&self, id: i64) -> Thread {
        self.lock().threads[&id].clone()
    }

    pub fn all_posts(&self) -> Vec<Post> {
        self.lock().posts.values().cloned().collect()
    }

    pub fn all_threads(&self) -> Vec<Thread> {
        self.lock().threads.values().cloned().collect()
    }
}

#[async_trait]
impl TweetStore for MemoryStore {
    async fn list_active_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(self
            .lock()
            .accounts
            .iter()
            .filter(|a| a.is_active())
            .cloned()
            .collect())
    }

    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>> {
        Ok(self.lock().accounts.iter().find(|a| a.id == account_id).cloned())
    }

    async fn count_pending_posts(&self, account_id: i64) -> StoreResult<i64> {
        let inner = self.lock();
        let stalled = |thread_id: Option<i64>| {
            thread_id
                .and_then(|id| inner.threads.get(&id))
                .is_some_and(|t| t.is_stalled())
        };
        Ok(inner
            .posts
            .values()
            .filter(|p| p.account_id == Some(account_id) && p.status.is_pending())
            .filter(|p| !stalled(p.thread_id))
            .count() as i64)
    }

    async fn insert_post(&self, post: NewPost) -> StoreResult<Post> {
        self.lock().insert_post(post).validate()
    }

    async fn adopt_unowned(&self, account_id: i64) -> StoreResult<u64> {
        let mut inner = self.lock();
        let mut adopted = 0;
        for t in inner.threads.values_mut().filter(|t| t.account_id.is_none()) {
            t.account_id = Some(account_id);
            adopted += 1;
        }
        for p in inner.posts.values_mut().filter(|p| p.account_id.is_none()) {
            p.account_id = Some(account_id);
            adopted += 1;
        }
        Ok(adopted)
    }

    async fn insert_thread(&self, thread: NewThread) -> StoreResult<ThreadWithPosts> {
        let mut inner = self.lock();
        inner.next_thread_id += 1;
        let stored = Thread {
            id: inner.next_thread_id,
            account_id: thread.account_id,
            title: thread.title.clone(),
            persona_key: thread.persona_key.clone(),
            category: thread.category.clone(),
            total_tweets: thread.segments.len() as i32,
            current_tweet: 0,
            parent_external_id: None,
            status: ThreadStatus::Ready,
            next_post_time: thread.next_post_time,
            last_error: None,
            claimed_at: None,
            created_at: Utc::now(),
        }
        .validate()?;
        inner.threads.insert(stored.id, stored.clone());

        let mut posts = Vec::new();
        for (idx, segment) in thread.segments.into_iter().enumerate() {
            let mut segment = segment;
            segment.account_id = thread.account_id;
            segment.thread_id = Some(stored.id);
            segment.sequence = Some(idx as i32 + 1);
            posts.push(inner.insert_post(segment));
        }
        Ok(ThreadWithPosts {
            thread: stored,
            posts,
        })
    }

    async fn schedule_post(&self, post_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.posts.get_mut(&post_id) {
            Some(p) if p.status.is_publishable() && p.claimed_at.is_none() => {
                p.status = PostStatus::Scheduled;
                p.scheduled_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn schedule_thread(&self, thread_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.threads.get_mut(&thread_id) {
            Some(t) if t.status == ThreadStatus::Ready && t.claimed_at.is_none() => {
                t.next_post_time = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_due_posts(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Post>> {
        let mut due: Vec<Post> = self
            .lock()
            .posts
            .values()
            .filter(|p| {
                p.account_id == Some(account_id)
                    && p.thread_id.is_none()
                    && p.status == PostStatus::Scheduled
                    && p.scheduled_at.is_some_and(|at| at >= from && at <= until)
            })
            .cloned()
            .collect();
        due.sort_by_key(|p| (p.scheduled_at, p.id));
        Ok(due)
    }

    async fn list_due_threads(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>> {
        let mut due: Vec<Thread> = self
            .lock()
            .threads
            .values()
            .filter(|t| {
                t.account_id == Some(account_id)
                    && match (t.status, t.next_post_time) {
                        (ThreadStatus::Ready, Some(at)) => at >= from && at <= until,
                        (ThreadStatus::Posting, Some(at)) => at <= until,
                        _ => false,
                    }
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.next_post_time, t.id));
        Ok(due)
    }

    async fn list_posts_needing_slot(
        &self,
        account_id: i64,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Post>> {
        Ok(self
            .lock()
            .posts
            .values()
            .filter(|p| {
                p.account_id == Some(account_id)
                    && p.thread_id.is_none()
                    && p.claimed_at.is_none()
                    && match (p.status, p.scheduled_at) {
                        (PostStatus::Ready, None) => true,
                        (PostStatus::Ready | PostStatus::Scheduled, Some(at)) => at < before,
                        _ => false,
                    }
            })
            .cloned()
            .collect())
    }

    async fn list_threads_needing_slot(
        &self,
        account_id: i64,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<Thread>> {
        Ok(self
            .lock()
            .threads
            .values()
            .filter(|t| {
                t.account_id == Some(account_id)
                    && t.status == ThreadStatus::Ready
                    && t.claimed_at.is_none()
                    && t.next_post_time.is_none_or(|at| at < before)
            })
            .cloned()
            .collect())
    }

    async fn list_taken_slots(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<DateTime<Utc>>> {
        let inner = self.lock();
        let mut taken: Vec<DateTime<Utc>> = inner
            .posts
            .values()
            .filter(|p| {
                p.account_id == Some(account_id)
                    && p.thread_id.is_none()
                    && p.status.is_publishable()
            })
            .filter_map(|p| p.scheduled_at)
            .chain(
                inner
                    .threads
                    .values()
                    .filter(|t| t.account_id == Some(account_id) && t.status == ThreadStatus::Ready)
                    .filter_map(|t| t.next_post_time),
            )
            .filter(|at| *at >= from)
            .collect();
        taken.sort();
        Ok(taken)
    }

    async fn list_thread_posts(&self, thread_id: i64) -> StoreResult<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .lock()
            .posts
            .values()
            .filter(|p| p.thread_id == Some(thread_id))
            .cloned()
            .collect();
        posts.sort_by_key(|p| p.sequence);
        Ok(posts)
    }

    async fn claim_post(&self, post_id: i64, now: DateTime<Utc>, lease: Duration) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.posts.get_mut(&post_id) {
            Some(p)
                if p.status.is_publishable()
                    && p.claimed_at.is_none_or(|c| c < now - lease) =>
            {
                p.claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_post_posted(&self, post_id: i64, meta: PostedMetadata) -> StoreResult<bool> {
        self.recording()?;
        Ok(self.lock().mark_posted(post_id, &meta))
    }

    async fn mark_post_failed(&self, post_id: i64, error: &str) -> StoreResult<bool> {
        Ok(self.lock().mark_failed(post_id, error))
    }

    async fn claim_thread(
        &self,
        thread_id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> StoreResult<bool> {
        let mut inner = self.lock();
        match inner.threads.get_mut(&thread_id) {
            Some(t)
                if matches!(t.status, ThreadStatus::Ready | ThreadStatus::Posting)
                    && t.current_tweet < t.total_tweets
                    && t.claimed_at.is_none_or(|c| c < now - lease) =>
            {
                t.status = ThreadStatus::Posting;
                t.claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_thread_step(
        &self,
        thread_id: i64,
        outcomes: Vec<SegmentOutcome>,
        progress: ThreadProgress,
    ) -> StoreResult<()> {
        self.recording()?;
        let mut inner = self.lock();
        if !inner.threads.contains_key(&thread_id) {
            return Err(StoreError::NotFound {
                entity: "thread",
                id: thread_id,
            });
        }
        for outcome in &outcomes {
            match &outcome.result {
                Ok(meta) => {
                    inner.mark_posted(outcome.post_id, meta);
                }
                Err(error) => {
                    inner.mark_failed(outcome.post_id, error);
                }
            }
        }
        if let Some(t) = inner.threads.get_mut(&thread_id) {
            t.current_tweet = progress.current_tweet;
            if progress.parent_external_id.is_some() {
                t.parent_external_id = progress.parent_external_id;
            }
            t.status = progress.status;
            t.next_post_time = progress.next_post_time;
            t.last_error = progress.last_error;
            t.claimed_at = None;
        }
        Ok(())
    }

    async fn list_retryable_failed(&self, account_id: i64, max_attempts: i32) -> StoreResult<Vec<Post>> {
        let inner = self.lock();
        Ok(inner
            .posts
            .values()
            .filter(|p| {
                p.account_id == Some(account_id)
                    && p.thread_id.is_none()
                    && p.status == PostStatus::Failed
                    && p.attempt < max_attempts
                    && !inner.posts.values().any(|r| r.retry_of == Some(p.id))
            })
            .cloned()
            .collect())
    }

    async fn earliest_thread_wakeup(&self) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .lock()
            .threads
            .values()
            .filter(|t| matches!(t.status, ThreadStatus::Ready | ThreadStatus::Posting))
            .filter_map(|t| t.next_post_time)
            .min())
    }

    async fn list_posts(&self, filter: PostFilter) -> StoreResult<Vec<Post>> {
        let mut posts: Vec<Post> = self
            .lock()
            .posts
            .values()
            .filter(|p| filter.account_id.is_none_or(|a| p.account_id == Some(a)))
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| !filter.standalone_only || p.thread_id.is_none())
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(posts
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn list_threads(&self, filter: ThreadFilter) -> StoreResult<Vec<Thread>> {
        let mut threads: Vec<Thread> = self
            .lock()
            .threads
            .values()
            .filter(|t| filter.account_id.is_none_or(|a| t.account_id == Some(a)))
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        threads.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(threads
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }
}

/// Publisher that answers from a script; once the script runs out every
/// call succeeds.
#[derive(Default)]
pub struct ScriptedPublisher {
    script: Mutex<VecDeque<Result<(), String>>>,
    delay: Option<std::time::Duration>,
    stall: Option<(usize, std::time::Duration)>,
    counter: AtomicUsize,
    requests: Mutex<Vec<PublishRequest>>,
}

impl ScriptedPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes for successive calls; `Err` carries the API error message
    pub fn with_script(script: Vec<Result<(), String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay only the `call`-th publish (1-based)
    pub fn with_stall_on(mut self, call: usize, delay: std::time::Duration) -> Self {
        self.stall = Some((call, delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn publish(&self, request: PublishRequest) -> Result<Published, PublishError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((_, delay)) = self.stall.filter(|(call, _)| *call == n) {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Ok(()));
        match next {
            Ok(()) => Ok(Published {
                id: format!("ext-{}", n),
                url: Some(format!("https://x.com/i/web/status/ext-{}", n)),
            }),
            Err(message) => Err(PublishError::Api(message)),
        }
    }
}

/// Generator that answers from a script; once the script runs out it
/// repeats the fallback.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<GeneratedContent, GenerationError>>>,
    fallback: GeneratedContent,
    delay: Option<std::time::Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn always(content: GeneratedContent) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: content,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_script(mut self, script: Vec<Result<GeneratedContent, GenerationError>>) -> Self {
        self.script = Mutex::new(script.into());
        self
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

pub fn single(text: &str, hashtags: &[&str]) -> GeneratedContent {
    GeneratedContent {
        text: text.to_string(),
        segments: Vec::new(),
        total_count: None,
        hashtags: hashtags.iter().map(|h| h.to_string()).collect(),
    }
}

/// Orchestrator over the given fakes: default weekday slots at UTC-5, no
/// jitter, round-robin personas, single posts only.
pub fn orchestrator(
    store: Arc<MemoryStore>,
    generator: Arc<ScriptedGenerator>,
    publisher: Arc<ScriptedPublisher>,
    skip_probability: f64,
    policy: OrchestratorPolicy,
) -> Orchestrator {
    let offset = FixedOffset::west_opt(5 * 3600).unwrap();
    let scheduler = SlotScheduler::new(
        SlotScheduler::default_slots(),
        SlotScheduler::default_weekdays(),
        offset,
    )
    .unwrap()
    .with_max_jitter(Duration::zero())
    .with_skip_probability(skip_probability);

    let executor = PostingExecutor::new(store.clone(), publisher, ExecutorConfig::default());
    let components = Components {
        rotator: PersonaRotator::new(
            Arc::new(PersonaCatalog::builtin()),
            RotationPolicy::RoundRobin,
            0.0,
        ),
        gate: QualityGate::default(),
        decomposer: ThreadDecomposer::default(),
        pipeline: PipelineManager::new(PipelineLimits::default()).unwrap(),
        scheduler,
    };
    Orchestrator::new(store, generator, executor, components, policy).with_seed(7)
}
