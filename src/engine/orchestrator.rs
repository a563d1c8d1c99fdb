//! Top-level control loop.
//!
//! One invocation walks every active account: generate when the pipeline is
//! shallow, give unscheduled or overdue work a free slot, post what is due
//! inside the tolerance window, and requeue failed single posts. Accounts
//! are processed concurrently; a second invocation while one is in flight
//! returns [`OrchestratorError::AlreadyRunning`].

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::domain::Account;
use crate::domain::twitter::{NewPost, NewThread};
use crate::engine::decomposer::ThreadDecomposer;
use crate::engine::executor::{PostOutcome, PostingExecutor};
use crate::engine::pipeline::PipelineManager;
use crate::engine::quality::{QualityGate, QualityPolicy, QualityScore, is_valid_hashtag};
use crate::engine::rotator::{ContentShape, Pick, PersonaRotator};
use crate::engine::scheduler::{NextRun, SlotScheduler};
use crate::error::{DecomposeError, GenerationError, OrchestratorError, StoreError};
use crate::services::{ContentGenerator, GeneratedContent, GenerationRequest};
use crate::store::TweetStore;

const TITLE_CHARS: usize = 60;

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Timer,
    Cron,
    Manual,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Timer => "timer",
            TriggerMode::Cron => "cron",
            TriggerMode::Manual => "manual",
        }
    }
}

impl FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "timer" => Ok(TriggerMode::Timer),
            "cron" => Ok(TriggerMode::Cron),
            "manual" => Ok(TriggerMode::Manual),
            other => Err(format!("unknown trigger mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorPolicy {
    /// Half-width of the posting window around now
    pub tolerance: Duration,
    pub generation_timeout: std::time::Duration,
    pub quality: QualityPolicy,
    /// Attempts a single post gets in total, including the first
    pub max_publish_attempts: i32,
    pub account_concurrency: usize,
    /// Account that takes over rows stored without an owner
    pub legacy_account_id: Option<i64>,
}

impl Default for OrchestratorPolicy {
    fn default() -> Self {
        Self {
            tolerance: Duration::minutes(10),
            generation_timeout: std::time::Duration::from_secs(20),
            quality: QualityPolicy::default(),
            max_publish_attempts: 2,
            account_concurrency: 4,
            legacy_account_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub item: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountSummary {
    pub account_id: i64,
    pub generated: u32,
    pub threads_generated: u32,
    pub generation_failures: u32,
    pub quality_rejections: u32,
    pub skipped_generation: bool,
    pub posted: u32,
    pub failed: u32,
    pub rescheduled: u32,
    pub requeued: u32,
    pub errors: Vec<ItemError>,
}

impl AccountSummary {
    fn new(account_id: i64) -> Self {
        Self {
            account_id,
            ..Self::default()
        }
    }

    fn error(&mut self, item: impl Into<String>, message: impl ToString) {
        self.errors.push(ItemError {
            item: item.into(),
            message: message.to_string(),
        });
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub accounts: usize,
    pub generated: u32,
    pub posted: u32,
    pub failed: u32,
    pub rescheduled: u32,
    pub requeued: u32,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub trigger: TriggerMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<AccountSummary>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn totals(&self) -> RunTotals {
        self.accounts.iter().fold(
            RunTotals {
                accounts: self.accounts.len(),
                ..RunTotals::default()
            },
            |mut t, a| {
                t.generated += a.generated;
                t.posted += a.posted;
                t.failed += a.failed;
                t.rescheduled += a.rescheduled;
                t.requeued += a.requeued;
                t.errors += a.errors.len();
                t
            },
        )
    }

    fn log(&self) {
        let totals = self.totals();
        info!(
            trigger = self.trigger.as_str(),
            accounts = totals.accounts,
            generated = totals.generated,
            posted = totals.posted,
            failed = totals.failed,
            rescheduled = totals.rescheduled,
            requeued = totals.requeued,
            errors = totals.errors,
            elapsed_ms = (self.finished_at - self.started_at).num_milliseconds(),
            next_run_at = ?self.next_run_at,
            "Orchestrator run finished"
        );
        for account in &self.accounts {
            for e in &account.errors {
                warn!(account_id = account.account_id, item = %e.item, error = %e.message, "Run item failed");
            }
        }
    }
}

/// Engine components owned by the orchestrator
pub struct Components {
    pub rotator: PersonaRotator,
    pub gate: QualityGate,
    pub decomposer: ThreadDecomposer,
    pub pipeline: PipelineManager,
    pub scheduler: SlotScheduler,
}

/// A generated unit ready to persist
enum Unit {
    Single(NewPost),
    Thread(NewThread),
}

pub struct Orchestrator {
    store: Arc<dyn TweetStore>,
    generator: Arc<dyn ContentGenerator>,
    executor: PostingExecutor,
    rotator: PersonaRotator,
    gate: QualityGate,
    decomposer: ThreadDecomposer,
    pipeline: PipelineManager,
    scheduler: SlotScheduler,
    policy: OrchestratorPolicy,
    rng: Mutex<StdRng>,
    iteration: AtomicUsize,
    run_lock: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TweetStore>,
        generator: Arc<dyn ContentGenerator>,
        executor: PostingExecutor,
        components: Components,
        policy: OrchestratorPolicy,
    ) -> Self {
        Self {
            store,
            generator,
            executor,
            rotator: components.rotator,
            gate: components.gate,
            decomposer: components.decomposer,
            pipeline: components.pipeline,
            scheduler: components.scheduler,
            policy,
            rng: Mutex::new(StdRng::from_os_rng()),
            iteration: AtomicUsize::new(0),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Deterministic randomness for tests and replays.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    #[cfg(test)]
    pub(crate) async fn hold_for_test(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.run_lock.lock().await
    }

    pub async fn run_once(&self, trigger: TriggerMode) -> Result<RunSummary, OrchestratorError> {
        self.run_at(trigger, Utc::now()).await
    }

    /// One full pass with `now` as the reference instant.
    pub async fn run_at(&self, trigger: TriggerMode, now: DateTime<Utc>) -> Result<RunSummary, OrchestratorError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| OrchestratorError::AlreadyRunning)?;

        info!(trigger = trigger.as_str(), %now, "Orchestrator run starting");
        let started_at = Utc::now();

        if let Some(account_id) = self.policy.legacy_account_id {
            let adopted = self.store.adopt_unowned(account_id).await?;
            if adopted > 0 {
                info!(account_id, adopted, "Assigned unowned posts and threads to legacy account");
            }
        }

        let accounts = self.store.list_active_accounts().await?;
        let mut summaries: Vec<AccountSummary> = stream::iter(accounts)
            .map(|account| self.process_account(account, now))
            .buffer_unordered(self.policy.account_concurrency.max(1))
            .collect()
            .await;
        summaries.sort_by_key(|s| s.account_id);

        let next_run_at = match self.next_run(Utc::now()).await {
            Ok(next) => Some(next.at),
            Err(e) => {
                warn!(error = %e, "Failed to compute next run");
                None
            }
        };

        let summary = RunSummary {
            trigger,
            started_at,
            finished_at: Utc::now(),
            accounts: summaries,
            next_run_at,
        };
        summary.log();
        Ok(summary)
    }

    /// Next orchestration instant: next slot or earliest thread continuation,
    /// whichever comes first, plus jitter.
    pub async fn next_run(&self, now: DateTime<Utc>) -> Result<NextRun, StoreError> {
        let earliest = self.store.earliest_thread_wakeup().await?;
        let mut rng = self.rng();
        Ok(self.scheduler.next_run(now, earliest, &mut *rng))
    }

    async fn process_account(&self, account: Account, now: DateTime<Utc>) -> AccountSummary {
        let mut summary = AccountSummary::new(account.id);
        let item = format!("account:{}", account.id);

        if let Err(e) = self.generate(&account, &mut summary).await {
            summary.error(item.clone(), e);
        }
        if let Err(e) = self.assign_slots(&account, now, &mut summary).await {
            summary.error(item.clone(), e);
        }
        if let Err(e) = self.post_due(&account, now, &mut summary).await {
            summary.error(item.clone(), e);
        }
        if let Err(e) = self.requeue_failed(&account, now, &mut summary).await {
            summary.error(item, e);
        }

        debug!(account_id = account.id, ?summary, "Account processed");
        summary
    }

    async fn generate(&self, account: &Account, summary: &mut AccountSummary) -> Result<(), OrchestratorError> {
        let skip = {
            let mut rng = self.rng();
            self.scheduler.roll_skip(&mut *rng)
        };
        if skip {
            info!(account_id = account.id, "Generation skipped this run");
            summary.skipped_generation = true;
            return Ok(());
        }

        let pending = self.store.count_pending_posts(account.id).await?;
        let decision = self.pipeline.should_generate(account, pending);
        if !decision.should_generate {
            debug!(account_id = account.id, pending, "Pipeline deep enough");
            return Ok(());
        }
        info!(account_id = account.id, pending, batch = decision.batch_size, "Generating content");

        for _ in 0..decision.batch_size {
            let iteration = self.iteration.fetch_add(1, Ordering::Relaxed);
            let pick = {
                let mut rng = self.rng();
                self.rotator.pick_next(account, iteration, None, &mut *rng)?
            };
            let item = format!("generate:{}/{}", pick.persona.key, pick.topic);

            let accepted = match self.generate_accepted(account, &pick, summary).await {
                Ok(Some(accepted)) => accepted,
                Ok(None) => {
                    warn!(account_id = account.id, persona = %pick.persona.key, "No candidate passed the quality gate");
                    summary.error(
                        item,
                        format!(
                            "no candidate passed the quality gate after {} attempts",
                            self.policy.quality.max_attempts
                        ),
                    );
                    continue;
                }
                Err(e) => {
                    summary.generation_failures += 1;
                    summary.error(item, e);
                    continue;
                }
            };

            let (content, score) = accepted;
            let unit = match self.build_unit(account, &pick, &content, &score) {
                Ok(unit) => unit,
                Err(e) => {
                    summary.generation_failures += 1;
                    summary.error(item, e);
                    continue;
                }
            };

            match unit {
                Unit::Single(post) => {
                    let post = self.store.insert_post(post).await?;
                    info!(account_id = account.id, post_id = post.id, score = score.overall, "Post generated");
                }
                Unit::Thread(thread) => {
                    let stored = self.store.insert_thread(thread).await?;
                    info!(
                        account_id = account.id,
                        thread_id = stored.thread.id,
                        segments = stored.posts.len(),
                        score = score.overall,
                        "Thread generated"
                    );
                    summary.threads_generated += 1;
                }
            }
            summary.generated += 1;
        }
        Ok(())
    }

    /// Generate under the timeout, regenerating with feedback until a
    /// candidate passes the quality policy or attempts run out.
    async fn generate_accepted(
        &self,
        account: &Account,
        pick: &Pick,
        summary: &mut AccountSummary,
    ) -> Result<Option<(GeneratedContent, QualityScore)>, GenerationError> {
        let policy = self.policy.quality;
        let mut feedback = Vec::new();

        for attempt in 1..=policy.max_attempts {
            let request = GenerationRequest {
                account_id: account.id,
                persona_key: pick.persona.key.clone(),
                persona_name: pick.persona.display_name.clone(),
                topic: pick.topic.clone(),
                shape: pick.shape,
                branding: account.branding().clone(),
                attempt,
                feedback: std::mem::take(&mut feedback),
            };

            let content = match timeout(self.policy.generation_timeout, self.generator.generate(&request)).await {
                Ok(result) => result?,
                Err(_) => return Err(GenerationError::Timeout(self.policy.generation_timeout.as_secs())),
            };

            let score = self.gate.score(&content.body(), &content.hashtags, &pick.persona);
            if policy.accepts(&score) {
                return Ok(Some((content, score)));
            }

            debug!(
                account_id = account.id,
                attempt,
                overall = score.overall,
                min = policy.min_score,
                "Candidate below quality threshold"
            );
            summary.quality_rejections += 1;
            feedback = score.feedback;
        }
        Ok(None)
    }

    fn build_unit(
        &self,
        account: &Account,
        pick: &Pick,
        content: &GeneratedContent,
        score: &QualityScore,
    ) -> Result<Unit, DecomposeError> {
        let hashtags: Vec<String> = content
            .hashtags
            .iter()
            .filter(|h| is_valid_hashtag(h))
            .cloned()
            .collect();
        let threads_allowed = pick.persona.thread_capable && account.branding().threads_enabled;

        match pick.shape {
            ContentShape::Single => match self.decomposer.compose_single(&content.body(), &hashtags) {
                Ok(text) => Ok(Unit::Single(self.new_post(account, pick, text, hashtags, score))),
                Err(DecomposeError::TooLong { len, .. }) if threads_allowed => {
                    debug!(account_id = account.id, len, "Single post too long, promoting to thread");
                    self.build_thread(account, pick, content, hashtags, score)
                }
                Err(e) => Err(e),
            },
            ContentShape::Thread => self.build_thread(account, pick, content, hashtags, score),
        }
    }

    fn build_thread(
        &self,
        account: &Account,
        pick: &Pick,
        content: &GeneratedContent,
        hashtags: Vec<String>,
        score: &QualityScore,
    ) -> Result<Unit, DecomposeError> {
        let raw = if content.segments.is_empty() {
            vec![content.text.clone()]
        } else {
            content.segments.clone()
        };
        let segments = self.decomposer.decompose(&raw, content.total_count)?;

        if segments.len() == 1 {
            let text = self.decomposer.compose_single(&segments[0], &hashtags)?;
            return Ok(Unit::Single(self.new_post(account, pick, text, hashtags, score)));
        }

        let title: String = segments[0].chars().take(TITLE_CHARS).collect();
        let texts = self.decomposer.assemble(&segments, &hashtags);
        let last = texts.len() - 1;
        let posts = texts
            .into_iter()
            .enumerate()
            .map(|(idx, text)| {
                let tags = if idx == last { hashtags.clone() } else { Vec::new() };
                self.new_post(account, pick, text, tags, score)
            })
            .collect();

        Ok(Unit::Thread(NewThread {
            account_id: Some(account.id),
            title,
            persona_key: pick.persona.key.clone(),
            category: pick.persona.category.clone(),
            next_post_time: None,
            segments: posts,
        }))
    }

    fn new_post(
        &self,
        account: &Account,
        pick: &Pick,
        text: String,
        hashtags: Vec<String>,
        score: &QualityScore,
    ) -> NewPost {
        let mut post = NewPost::ready(Some(account.id), text, &pick.persona.key);
        post.hashtags = hashtags;
        post.topic_key = Some(pick.topic.clone());
        post.quality = Some(score.clone());
        post
    }

    /// Give unscheduled and overdue work the next free slot. Overdue items
    /// are moved forward rather than posted late.
    async fn assign_slots(
        &self,
        account: &Account,
        now: DateTime<Utc>,
        summary: &mut AccountSummary,
    ) -> Result<(), OrchestratorError> {
        let overdue_before = now - self.policy.tolerance;
        let mut taken = self.store.list_taken_slots(account.id, now).await?;

        for post in self.store.list_posts_needing_slot(account.id, overdue_before).await? {
            let item = format!("post:{}", post.id);
            let Some(at) = self.scheduler.next_free_slot(now, &taken, Some(&post.persona_key)) else {
                summary.error(item, "no free slot within the scheduling horizon");
                continue;
            };
            if !self.store.schedule_post(post.id, at).await? {
                continue;
            }
            taken.push(at);
            match post.scheduled_at {
                Some(missed) => {
                    info!(account_id = account.id, post_id = post.id, %missed, %at, "Overdue post rescheduled");
                    summary.rescheduled += 1;
                }
                None => debug!(account_id = account.id, post_id = post.id, %at, "Post scheduled"),
            }
        }

        for thread in self.store.list_threads_needing_slot(account.id, overdue_before).await? {
            let item = format!("thread:{}", thread.id);
            let Some(at) = self.scheduler.next_free_slot(now, &taken, Some(&thread.persona_key)) else {
                summary.error(item, "no free slot within the scheduling horizon");
                continue;
            };
            if !self.store.schedule_thread(thread.id, at).await? {
                continue;
            }
            taken.push(at);
            match thread.next_post_time {
                Some(missed) => {
                    info!(account_id = account.id, thread_id = thread.id, %missed, %at, "Overdue thread rescheduled");
                    summary.rescheduled += 1;
                }
                None => debug!(account_id = account.id, thread_id = thread.id, %at, "Thread scheduled"),
            }
        }
        Ok(())
    }

    async fn post_due(
        &self,
        account: &Account,
        now: DateTime<Utc>,
        summary: &mut AccountSummary,
    ) -> Result<(), OrchestratorError> {
        let (from, until) = (now - self.policy.tolerance, now + self.policy.tolerance);

        for post in self.store.list_due_posts(account.id, from, until).await? {
            let item = format!("post:{}", post.id);
            match self.executor.post(&post, now).await {
                Ok(PostOutcome::Posted(_)) => summary.posted += 1,
                Ok(PostOutcome::Failed(message)) => {
                    summary.failed += 1;
                    summary.error(item, message);
                }
                Ok(PostOutcome::NotClaimed) => {}
                Err(e) => summary.error(item, e),
            }
        }

        for thread in self.store.list_due_threads(account.id, from, until).await? {
            let item = format!("thread:{}", thread.id);
            match self.executor.post_thread(&thread, now).await {
                Ok(outcome) => {
                    summary.posted += outcome.posted as u32;
                    if let Some(message) = outcome.error {
                        summary.failed += 1;
                        summary.error(item, message);
                    }
                }
                Err(e) => summary.error(item, e),
            }
        }
        Ok(())
    }

    /// Failed single posts get a fresh attempt in the next free slot.
    async fn requeue_failed(
        &self,
        account: &Account,
        now: DateTime<Utc>,
        summary: &mut AccountSummary,
    ) -> Result<(), OrchestratorError> {
        let failed = self
            .store
            .list_retryable_failed(account.id, self.policy.max_publish_attempts)
            .await?;
        if failed.is_empty() {
            return Ok(());
        }

        let mut taken = self.store.list_taken_slots(account.id, now).await?;
        for post in failed {
            let at = self.scheduler.next_free_slot(now, &taken, Some(&post.persona_key));
            let retry = self.store.insert_post(NewPost::retry_of(&post, at)).await?;
            taken.extend(at);
            info!(
                account_id = account.id,
                failed_post_id = post.id,
                retry_post_id = retry.id,
                attempt = retry.attempt,
                scheduled_at = ?at,
                "Failed post requeued"
            );
            summary.requeued += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::twitter::{PostStatus, ThreadStatus};
    use crate::testing::{self, MemoryStore, ScriptedGenerator, ScriptedPublisher, account, single};
    use chrono::TimeZone;

    // Sunday 21:00 local (UTC-5); the next slot is Monday 08:00 local
    fn sunday_night() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 2, 0, 0).single().unwrap()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        generator: Arc<ScriptedGenerator>,
        publisher: Arc<ScriptedPublisher>,
    }

    impl Harness {
        fn new(generator: ScriptedGenerator) -> Self {
            Self {
                store: Arc::new(MemoryStore::with_accounts(vec![account(1)])),
                generator: Arc::new(generator),
                publisher: Arc::new(ScriptedPublisher::new()),
            }
        }

        fn orchestrator(&self, skip_probability: f64, policy: OrchestratorPolicy) -> Orchestrator {
            testing::orchestrator(
                self.store.clone(),
                self.generator.clone(),
                self.publisher.clone(),
                skip_probability,
                policy,
            )
        }
    }

    fn lenient() -> OrchestratorPolicy {
        OrchestratorPolicy {
            quality: QualityPolicy {
                min_score: 0,
                max_attempts: 3,
            },
            ..OrchestratorPolicy::default()
        }
    }

    async fn scheduled_post(store: &MemoryStore, at: DateTime<Utc>) -> i64 {
        let mut post = NewPost::ready(Some(1), "scheduled earlier".into(), "analyst");
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(at);
        store.insert_post(post).await.unwrap().id
    }

    #[tokio::test]
    async fn fills_shallow_pipeline_into_distinct_slots() {
        let h = Harness::new(ScriptedGenerator::always(single("What would you build with it?", &["#rust"])));
        let orch = h.orchestrator(0.0, lenient());

        let summary = orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();
        let acct = &summary.accounts[0];
        assert_eq!(acct.generated, 3);
        assert_eq!(acct.posted, 0);
        assert!(acct.errors.is_empty());

        let posts = h.store.all_posts();
        assert_eq!(posts.len(), 3);
        let mut slots: Vec<_> = posts.iter().filter_map(|p| p.scheduled_at).collect();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), 3);
        assert!(posts.iter().all(|p| p.status == PostStatus::Scheduled));
        assert!(posts.iter().all(|p| p.content.ends_with("#rust")));
        assert_eq!(h.publisher.calls(), 0);
        assert!(summary.next_run_at.is_some());
    }

    #[tokio::test]
    async fn skip_roll_never_blocks_posting() {
        let h = Harness::new(ScriptedGenerator::always(single("unused", &[])));
        let now = sunday_night();
        let due = scheduled_post(&h.store, now + Duration::minutes(2)).await;
        let orch = h.orchestrator(1.0, lenient());

        let summary = orch.run_at(TriggerMode::Timer, now).await.unwrap();
        let acct = &summary.accounts[0];
        assert!(acct.skipped_generation);
        assert_eq!(acct.generated, 0);
        assert_eq!(acct.posted, 1);
        assert!(h.generator.requests().is_empty());
        assert_eq!(h.store.post(due).status, PostStatus::Posted);
    }

    #[tokio::test]
    async fn regenerates_until_attempts_exhausted() {
        let h = Harness::new(ScriptedGenerator::always(single("meh", &[])));
        let policy = OrchestratorPolicy {
            quality: QualityPolicy {
                min_score: 101,
                max_attempts: 3,
            },
            ..OrchestratorPolicy::default()
        };
        let orch = h.orchestrator(0.0, policy);

        let summary = orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();
        let acct = &summary.accounts[0];
        assert_eq!(acct.generated, 0);
        // Three units, three attempts each
        assert_eq!(acct.quality_rejections, 9);
        assert_eq!(acct.errors.len(), 3);
        assert!(acct.errors[0].item.starts_with("generate:"));
        assert!(acct.errors[0].message.contains("after 3 attempts"));

        let attempts: Vec<u32> = h.generator.requests().iter().map(|r| r.attempt).collect();
        assert_eq!(&attempts[..3], &[1, 2, 3]);
        assert!(h.store.all_posts().is_empty());
    }

    #[tokio::test]
    async fn generator_timeout_is_counted_not_fatal() {
        let h = Harness::new(
            ScriptedGenerator::always(single("slow", &[])).with_delay(std::time::Duration::from_millis(500)),
        );
        let policy = OrchestratorPolicy {
            generation_timeout: std::time::Duration::from_millis(20),
            ..lenient()
        };
        let orch = h.orchestrator(0.0, policy);

        let summary = orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();
        let acct = &summary.accounts[0];
        assert_eq!(acct.generation_failures, 3);
        assert_eq!(acct.errors.len(), 3);
        assert!(acct.errors[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn malformed_output_skips_only_that_unit() {
        let h = Harness::new(
            ScriptedGenerator::always(single("Solid take on ownership", &[]))
                .with_script(vec![Err(GenerationError::Malformed("no text".into()))]),
        );
        let orch = h.orchestrator(0.0, lenient());

        let summary = orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();
        let acct = &summary.accounts[0];
        assert_eq!(acct.generation_failures, 1);
        assert_eq!(acct.generated, 2);
    }

    #[tokio::test]
    async fn overlapping_run_is_rejected() {
        let h = Harness::new(
            ScriptedGenerator::always(single("slow", &[])).with_delay(std::time::Duration::from_millis(200)),
        );
        let orch = Arc::new(h.orchestrator(0.0, lenient()));

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.run_at(TriggerMode::Timer, sunday_night()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(orch.is_running());
        assert!(matches!(
            orch.run_once(TriggerMode::Manual).await,
            Err(OrchestratorError::AlreadyRunning)
        ));
        assert!(first.await.unwrap().is_ok());
        assert!(!orch.is_running());
    }

    #[tokio::test]
    async fn overdue_post_is_rescheduled_not_posted() {
        let h = Harness::new(ScriptedGenerator::always(single("unused", &[])));
        let now = sunday_night();
        let overdue = scheduled_post(&h.store, now - Duration::hours(1)).await;
        let orch = h.orchestrator(1.0, lenient());

        let summary = orch.run_at(TriggerMode::Timer, now).await.unwrap();
        assert_eq!(summary.accounts[0].rescheduled, 1);
        assert_eq!(h.publisher.calls(), 0);

        let post = h.store.post(overdue);
        assert_eq!(post.status, PostStatus::Scheduled);
        assert!(post.scheduled_at.unwrap() > now);
    }

    #[tokio::test]
    async fn failed_post_is_requeued_once() {
        let h = Harness {
            publisher: Arc::new(ScriptedPublisher::with_script(vec![Err("over capacity".into())])),
            ..Harness::new(ScriptedGenerator::always(single("unused", &[])))
        };
        let now = sunday_night();
        let original = scheduled_post(&h.store, now).await;
        let orch = h.orchestrator(1.0, lenient());

        let summary = orch.run_at(TriggerMode::Timer, now).await.unwrap();
        let acct = &summary.accounts[0];
        assert_eq!(acct.failed, 1);
        assert_eq!(acct.requeued, 1);
        assert!(acct.errors[0].message.contains("over capacity"));

        assert_eq!(h.store.post(original).status, PostStatus::Failed);
        let retry = h
            .store
            .all_posts()
            .into_iter()
            .find(|p| p.retry_of == Some(original))
            .unwrap();
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.status, PostStatus::Scheduled);
        assert!(retry.scheduled_at.unwrap() > now);

        // A second run does not requeue the same failure again
        let again = orch.run_at(TriggerMode::Timer, now).await.unwrap();
        assert_eq!(again.accounts[0].requeued, 0);
    }

    #[tokio::test]
    async fn long_single_is_promoted_to_thread() {
        let sentence = "Ownership makes aliasing explicit and the borrow checker enforces it. ";
        let long = sentence.repeat(6);
        let h = Harness::new(ScriptedGenerator::always(single(&long, &["#rust"])));
        let mut acct = account(1);
        acct.personas = vec!["analyst".into()];
        let h = Harness {
            store: Arc::new(MemoryStore::with_accounts(vec![acct])),
            ..h
        };
        let orch = h.orchestrator(0.0, lenient());

        let summary = orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();
        assert_eq!(summary.accounts[0].threads_generated, 3);

        let threads = h.store.all_threads();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|t| t.status == ThreadStatus::Ready));
        assert!(threads.iter().all(|t| t.next_post_time.is_some()));

        let segments = h.store.list_thread_posts(threads[0].id).await.unwrap();
        assert!(segments.len() >= 2);
        assert!(segments[0].content.starts_with(crate::constants::THREAD_MARKER));
        assert!(segments.iter().all(|s| s.content.chars().count() <= crate::constants::MAX_POST_CHARS));
    }

    #[test]
    fn totals_are_derived_from_accounts() {
        let summary = RunSummary {
            trigger: TriggerMode::Manual,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            accounts: vec![
                AccountSummary {
                    posted: 2,
                    failed: 1,
                    errors: vec![ItemError {
                        item: "post:1".into(),
                        message: "boom".into(),
                    }],
                    ..AccountSummary::new(1)
                },
                AccountSummary {
                    generated: 3,
                    ..AccountSummary::new(2)
                },
            ],
            next_run_at: None,
        };
        let totals = summary.totals();
        assert_eq!(totals.accounts, 2);
        assert_eq!(totals.posted, 2);
        assert_eq!(totals.generated, 3);
        assert_eq!(totals.errors, 1);
    }

    #[tokio::test]
    async fn failed_thread_does_not_starve_generation() {
        let h = Harness {
            publisher: Arc::new(ScriptedPublisher::with_script(vec![Err("suspended".into())])),
            ..Harness::new(ScriptedGenerator::always(single("fresh take", &[])))
        };
        let segments = (1..=4)
            .map(|i| NewPost::ready(Some(1), format!("segment {}", i), "analyst"))
            .collect();
        let thread = h
            .store
            .insert_thread(NewThread {
                account_id: Some(1),
                title: "four".into(),
                persona_key: "analyst".into(),
                category: None,
                next_post_time: Some(sunday_night()),
                segments,
            })
            .await
            .unwrap()
            .thread;
        let orch = h.orchestrator(0.0, lenient());

        // Four ready segments keep the pipeline full on the first run
        let first = orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();
        assert_eq!(first.accounts[0].generated, 0);
        assert_eq!(h.store.thread(thread.id).status, ThreadStatus::Failed);
        assert_eq!(h.store.count_pending_posts(1).await.unwrap(), 0);

        let later = sunday_night() + Duration::days(1);
        let second = orch.run_at(TriggerMode::Manual, later).await.unwrap();
        assert!(second.accounts[0].generated > 0);
        assert!(!h.generator.requests().is_empty());
    }

    #[tokio::test]
    async fn legacy_account_takes_over_unowned_rows() {
        let h = Harness::new(ScriptedGenerator::always(single("fresh take", &[])));
        let mut post = NewPost::ready(None, "from the single-account days".into(), "analyst");
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(sunday_night());
        let post_id = h.store.insert_post(post).await.unwrap().id;

        let policy = OrchestratorPolicy {
            legacy_account_id: Some(1),
            ..lenient()
        };
        let orch = h.orchestrator(1.0, policy);
        orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();

        let stored = h.store.post(post_id);
        assert_eq!(stored.account_id, Some(1));
        assert_eq!(stored.status, PostStatus::Posted);
        let request = h
            .publisher
            .requests()
            .into_iter()
            .find(|r| r.text == "from the single-account days")
            .unwrap();
        assert_eq!(request.account_id, Some(1));
    }

    #[tokio::test]
    async fn unowned_rows_stay_put_without_legacy_account() {
        let h = Harness::new(ScriptedGenerator::always(single("fresh take", &[])));
        let mut post = NewPost::ready(None, "orphan".into(), "analyst");
        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(sunday_night());
        let post_id = h.store.insert_post(post).await.unwrap().id;

        let orch = h.orchestrator(1.0, lenient());
        orch.run_at(TriggerMode::Manual, sunday_night()).await.unwrap();

        let stored = h.store.post(post_id);
        assert_eq!(stored.account_id, None);
        assert_eq!(stored.status, PostStatus::Scheduled);
    }

    #[test]
    fn trigger_mode_parses() {
        assert_eq!("CRON".parse::<TriggerMode>(), Ok(TriggerMode::Cron));
        assert!("hourly".parse::<TriggerMode>().is_err());
    }
}
