pub mod holiday;
pub mod inject;
pub mod pool;
pub mod prompt;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, Timelike};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::{self, Config};
use crate::llm::{LlmClient, Message};
use crate::session::SessionStore;
use store::{DailyState, DailyStore};

#[derive(Debug, Error)]
pub enum LifeError {
    #[error("generation call failed: {0}")]
    Generation(anyhow::Error),
    #[error("generation timed out after {0}s")]
    Timeout(u64),
    #[error("could not parse generation reply: {0}")]
    Parse(String),
    #[error("failed to persist daily state: {0}")]
    Store(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayState {
    Absent,
    Stale,
    Fresh,
}

/// Classify today's record against the configured schedule instant.
///
/// A record generated before today's scheduled time counts as fresh only
/// until that time arrives; manual records stay fresh for their whole day.
pub fn classify(
    record: Option<&DailyState>,
    now: DateTime<Local>,
    schedule: (u32, u32),
) -> DayState {
    let Some(record) = record else {
        return DayState::Absent;
    };
    let today = now.date_naive();
    if record.manual && record.generated_at.date_naive() == today {
        return DayState::Fresh;
    }
    let sched_minutes = schedule.0 * 60 + schedule.1;
    let now_minutes = now.time().hour() * 60 + now.time().minute();
    if now_minutes < sched_minutes {
        return DayState::Fresh;
    }
    let generated = record.generated_at;
    let gen_minutes = generated.time().hour() * 60 + generated.time().minute();
    let gen_date = generated.date_naive();
    if gen_date < today || gen_minutes < sched_minutes {
        DayState::Stale
    } else {
        DayState::Fresh
    }
}

/// Owns every DailyState mutation. The scheduled timer, the per-request
/// lazy path and the manual command all funnel through here, serialized
/// by `gen_guard` so concurrent triggers cannot double-spend a
/// generation call.
pub struct LifeManager {
    config: Arc<RwLock<Config>>,
    config_path: PathBuf,
    store: DailyStore,
    sessions: Arc<SessionStore>,
    llm: Arc<dyn LlmClient>,
    gen_guard: Mutex<()>,
}

impl LifeManager {
    pub fn new(
        config: Arc<RwLock<Config>>,
        config_path: PathBuf,
        store: DailyStore,
        sessions: Arc<SessionStore>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            config,
            config_path,
            store,
            sessions,
            llm,
            gen_guard: Mutex::new(()),
        }
    }

    pub async fn schedule_time(&self) -> (u32, u32) {
        let cfg = self.config.read().await;
        config::parse_schedule_time(&cfg.life.schedule_time).unwrap_or((7, 30))
    }

    /// Today's record as stored, with no generation attempt.
    pub fn today(&self) -> Option<DailyState> {
        self.store.get(Local::now().date_naive())
    }

    /// Return today's state, generating it first if absent or stale.
    pub async fn ensure_fresh(&self) -> Result<DailyState, LifeError> {
        let schedule = self.schedule_time().await;
        if let Some(state) = self.fresh_today(schedule) {
            return Ok(state);
        }
        let _guard = self.gen_guard.lock().await;
        // Re-check: a concurrent trigger may have generated while we waited.
        if let Some(state) = self.fresh_today(schedule) {
            return Ok(state);
        }
        self.generate(Local::now(), None, false).await
    }

    /// Manual path: always regenerates, overwriting any existing record.
    /// The supplement is consumed once and never persisted.
    pub async fn regenerate(&self, supplement: Option<&str>) -> Result<DailyState, LifeError> {
        let _guard = self.gen_guard.lock().await;
        self.generate(Local::now(), supplement, true).await
    }

    /// The injection block for an outbound request, or None when no state
    /// is available even after the lazy attempt.
    pub async fn injection(&self) -> Option<String> {
        match self.ensure_fresh().await {
            Ok(state) => inject::render(Some(&state), Local::now().time()),
            Err(e) => {
                tracing::warn!("Skipping persona-state injection: {e}");
                None
            }
        }
    }

    /// Daily timer entry point. Failures are logged and not retried; the
    /// next chance is the next timer fire or a lazy-load trigger.
    pub async fn on_timer(&self) {
        match self.ensure_fresh().await {
            Ok(state) => tracing::info!("Daily state ready for {}", state.date),
            Err(e) => tracing::error!("Scheduled daily state generation failed: {e}"),
        }
    }

    /// Validate and apply a new schedule time, persisting the config.
    /// Nothing is applied when validation or persistence fails.
    pub async fn set_schedule_time(&self, value: &str) -> Result<(u32, u32)> {
        let parsed = config::parse_schedule_time(value)?;
        let mut cfg = self.config.write().await;
        let previous = std::mem::replace(&mut cfg.life.schedule_time, value.to_string());
        if let Err(e) = config::save(&cfg, &self.config_path) {
            cfg.life.schedule_time = previous;
            return Err(e);
        }
        tracing::info!("Daily schedule time set to {value}");
        Ok(parsed)
    }

    fn fresh_today(&self, schedule: (u32, u32)) -> Option<DailyState> {
        let now = Local::now();
        let state = self.store.get(now.date_naive())?;
        (classify(Some(&state), now, schedule) == DayState::Fresh).then_some(state)
    }

    async fn generate(
        &self,
        now: DateTime<Local>,
        supplement: Option<&str>,
        manual: bool,
    ) -> Result<DailyState, LifeError> {
        let date = now.date_naive();
        let (prompt, timeout_secs) = {
            let cfg = self.config.read().await;
            let history = self
                .store
                .history_before(date, cfg.life.reference_history_days);
            let mut chats = Vec::new();
            for chat_ref in &cfg.life.reference_chats {
                match self.sessions.recent(&chat_ref.source, chat_ref.count) {
                    Some(entries) => chats.push((chat_ref.source.clone(), entries)),
                    None => {
                        tracing::debug!("Chat source {} has no history, skipping", chat_ref.source)
                    }
                }
            }
            let draw = pool::draw(&cfg.life.pool, &mut rand::rng());
            (
                prompt::build(
                    &cfg.life,
                    &cfg.agent.persona,
                    date,
                    &draw,
                    &history,
                    &chats,
                    supplement,
                ),
                cfg.life.generation_timeout_secs,
            )
        };

        tracing::info!("Generating daily state for {date}");
        let reply = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.llm.chat(vec![Message::user(prompt)]),
        )
        .await
        {
            Err(_) => return Err(LifeError::Timeout(timeout_secs)),
            Ok(Err(e)) => return Err(LifeError::Generation(e)),
            Ok(Ok(reply)) => reply,
        };

        let (outfit, schedule) = parse_reply(&reply)?;
        let state = DailyState {
            date,
            outfit,
            schedule,
            generated_at: now,
            manual,
        };
        self.store.put(state.clone()).map_err(LifeError::Store)?;
        tracing::info!("Daily state for {date} persisted");
        Ok(state)
    }
}

#[derive(Deserialize)]
struct GeneratedFields {
    outfit: String,
    schedule: String,
}

/// Pull the outfit/schedule fields out of the model's reply. The reply
/// must contain one JSON object with both fields; anything else is a
/// generation failure and nothing is persisted.
fn parse_reply(text: &str) -> Result<(String, String), LifeError> {
    let json =
        extract_object(text).ok_or_else(|| LifeError::Parse("no JSON object in reply".into()))?;
    let fields: GeneratedFields =
        serde_json::from_str(json).map_err(|e| LifeError::Parse(e.to_string()))?;
    if fields.outfit.trim().is_empty() || fields.schedule.trim().is_empty() {
        return Err(LifeError::Parse("empty outfit or schedule field".into()));
    }
    Ok((fields.outfit, fields.schedule))
}

/// First balanced JSON object in the text, brace-matched with string and
/// escape awareness so code fences or prose around it do not matter.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape = false;
    for (i, ch) in text[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else {
            match ch {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..start + i + 1]);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REPLY: &str = r#"{"outfit": "linen shirt", "schedule": "slow morning, errands after lunch"}"#;

    struct MockLlm {
        reply: String,
        fail: bool,
        delay: Duration,
        calls: AtomicUsize,
        prompts: std::sync::Mutex<Vec<String>>,
    }

    impl MockLlm {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                fail: false,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                prompts: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: String::new(),
                fail: true,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                prompts: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn slow(reply: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                fail: false,
                delay,
                calls: AtomicUsize::new(0),
                prompts: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for MockLlm {
        async fn chat(&self, messages: Vec<Message>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(m) = messages.last() {
                self.prompts.lock().unwrap().push(m.content.clone());
            }
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("model unavailable");
            }
            Ok(self.reply.clone())
        }
    }

    fn fixture(dir: &Path, llm: Arc<dyn LlmClient>) -> LifeManager {
        fixture_with(dir, llm, "")
    }

    fn fixture_with(dir: &Path, llm: Arc<dyn LlmClient>, life_extra: &str) -> LifeManager {
        let cfg: Config = toml::from_str(&format!(
            r#"
            [agent]
            name = "higoto"

            [llm]
            provider = "openai"
            model = "gpt-4o"
            api_key = "k"

            [life]
            schedule_time = "00:00"
            {life_extra}
            "#
        ))
        .unwrap();
        LifeManager::new(
            Arc::new(RwLock::new(cfg)),
            dir.join("config.toml"),
            DailyStore::new(dir.join("daily_state.json")),
            Arc::new(SessionStore::new(dir.to_path_buf()).unwrap()),
            llm,
        )
    }

    fn stale_record(outfit: &str) -> DailyState {
        DailyState {
            date: Local::now().date_naive(),
            outfit: outfit.to_string(),
            schedule: "old plan".to_string(),
            generated_at: Local::now() - chrono::Duration::days(1),
            manual: false,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        use chrono::TimeZone;
        Local.with_ymd_and_hms(2026, 8, 7, h, m, 0).single().unwrap()
    }

    fn record_at(generated: DateTime<Local>, manual: bool) -> DailyState {
        DailyState {
            date: at(12, 0).date_naive(),
            outfit: "o".to_string(),
            schedule: "s".to_string(),
            generated_at: generated,
            manual,
        }
    }

    // --- classification ---

    #[test]
    fn test_classify_absent() {
        assert_eq!(classify(None, at(12, 0), (7, 30)), DayState::Absent);
    }

    #[test]
    fn test_classify_stale_when_generated_yesterday() {
        let rec = record_at(at(12, 0) - chrono::Duration::days(1), false);
        assert_eq!(classify(Some(&rec), at(12, 0), (7, 30)), DayState::Stale);
    }

    #[test]
    fn test_classify_stale_when_generated_before_schedule() {
        let rec = record_at(at(6, 0), false);
        assert_eq!(classify(Some(&rec), at(12, 0), (7, 30)), DayState::Stale);
    }

    #[test]
    fn test_classify_fresh_before_schedule_instant() {
        // Lazily generated at 06:00; the 07:30 run is still ahead, so the
        // record serves until then.
        let rec = record_at(at(6, 0), false);
        assert_eq!(classify(Some(&rec), at(7, 0), (7, 30)), DayState::Fresh);
    }

    #[test]
    fn test_classify_fresh_at_or_after_schedule() {
        let rec = record_at(at(7, 30), false);
        assert_eq!(classify(Some(&rec), at(12, 0), (7, 30)), DayState::Fresh);
        let rec = record_at(at(9, 15), false);
        assert_eq!(classify(Some(&rec), at(23, 59), (7, 30)), DayState::Fresh);
    }

    #[test]
    fn test_classify_manual_stays_fresh_all_day() {
        let rec = record_at(at(6, 0), true);
        assert_eq!(classify(Some(&rec), at(12, 0), (7, 30)), DayState::Fresh);
    }

    // --- reply parsing ---

    #[test]
    fn test_parse_reply_plain_json() {
        let (outfit, schedule) = parse_reply(REPLY).unwrap();
        assert_eq!(outfit, "linen shirt");
        assert_eq!(schedule, "slow morning, errands after lunch");
    }

    #[test]
    fn test_parse_reply_fenced_and_padded() {
        let text = format!("Sure! Here is the plan:\n```json\n{REPLY}\n```\nEnjoy!");
        let (outfit, _) = parse_reply(&text).unwrap();
        assert_eq!(outfit, "linen shirt");
    }

    #[test]
    fn test_parse_reply_braces_inside_strings() {
        let text = r#"{"outfit": "tee with a {logo}", "schedule": "day {1} of rest"}"#;
        let (outfit, schedule) = parse_reply(text).unwrap();
        assert_eq!(outfit, "tee with a {logo}");
        assert_eq!(schedule, "day {1} of rest");
    }

    #[test]
    fn test_parse_reply_rejects_missing_field() {
        assert!(parse_reply(r#"{"outfit": "only this"}"#).is_err());
    }

    #[test]
    fn test_parse_reply_rejects_no_object() {
        assert!(parse_reply("I had trouble generating that today.").is_err());
    }

    #[test]
    fn test_parse_reply_rejects_empty_fields() {
        assert!(parse_reply(r#"{"outfit": "", "schedule": "x"}"#).is_err());
    }

    // --- orchestration ---

    #[tokio::test]
    async fn test_lazy_generation_creates_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::replying(REPLY);
        let life = fixture(dir.path(), llm.clone());

        let state = life.ensure_fresh().await.unwrap();
        assert_eq!(state.outfit, "linen shirt");
        assert!(life.today().is_some());

        // Already fresh: no second call.
        life.ensure_fresh().await.unwrap();
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::failing();
        let life = fixture(dir.path(), llm.clone());
        life.store.put(stale_record("old outfit")).unwrap();

        assert!(life.ensure_fresh().await.is_err());
        assert_eq!(life.today().unwrap().outfit, "old outfit");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_generation_with_no_record_stays_absent() {
        let dir = tempfile::tempdir().unwrap();
        let life = fixture(dir.path(), MockLlm::failing());

        assert!(life.ensure_fresh().await.is_err());
        assert!(life.today().is_none());
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::replying("no json here");
        let life = fixture(dir.path(), llm.clone());
        life.store.put(stale_record("old outfit")).unwrap();

        let err = life.ensure_fresh().await.unwrap_err();
        assert!(matches!(err, LifeError::Parse(_)));
        assert_eq!(life.today().unwrap().outfit, "old outfit");
    }

    #[tokio::test]
    async fn test_concurrent_triggers_generate_once() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::slow(REPLY, Duration::from_millis(50));
        let life = Arc::new(fixture(dir.path(), llm.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let life = life.clone();
            handles.push(tokio::spawn(async move { life.ensure_fresh().await }));
        }
        for handle in handles {
            let state = handle.await.unwrap().unwrap();
            assert_eq!(state.outfit, "linen shirt");
        }
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_generation_timeout_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::slow(REPLY, Duration::from_secs(5));
        let life = fixture_with(dir.path(), llm, "generation_timeout_secs = 1");

        tokio::time::pause();
        let result = life.ensure_fresh().await;
        assert!(matches!(result, Err(LifeError::Timeout(1))));
        assert!(life.today().is_none());
    }

    #[tokio::test]
    async fn test_manual_regenerate_overwrites_with_supplement() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::replying(REPLY);
        let life = fixture(dir.path(), llm.clone());
        life.store
            .put(DailyState {
                generated_at: Local::now(),
                ..stale_record("yesterday's pick")
            })
            .unwrap();

        let state = life.regenerate(Some("wear something red")).await.unwrap();
        assert_eq!(state.outfit, "linen shirt");
        assert!(state.manual);
        assert!(llm.last_prompt().contains("Additional request"));
        assert!(llm.last_prompt().contains("wear something red"));
        assert_eq!(life.today().unwrap().outfit, "linen shirt");
    }

    #[tokio::test]
    async fn test_manual_failure_preserves_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let life = fixture(dir.path(), MockLlm::failing());
        life.store.put(stale_record("kept outfit")).unwrap();

        assert!(life.regenerate(Some("anything")).await.is_err());
        let kept = life.today().unwrap();
        assert_eq!(kept.outfit, "kept outfit");
        assert!(!kept.manual);
    }

    #[tokio::test]
    async fn test_missing_chat_source_does_not_block_generation() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::replying(REPLY);
        let life = fixture_with(
            dir.path(),
            llm.clone(),
            r#"reference_chats = [{ source = "ghost", count = 5 }]"#,
        );

        assert!(life.ensure_fresh().await.is_ok());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_recent_chats_feed_the_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::replying(REPLY);
        let life = fixture_with(
            dir.path(),
            llm.clone(),
            r#"reference_chats = [{ source = "cli:default", count = 5 }]"#,
        );
        life.sessions
            .record("cli:default", "user", "let's bake bread tomorrow")
            .unwrap();

        life.ensure_fresh().await.unwrap();
        assert!(llm.last_prompt().contains("let's bake bread tomorrow"));
    }

    #[tokio::test]
    async fn test_history_feeds_the_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::replying(REPLY);
        let life = fixture(dir.path(), llm.clone());
        life.store
            .put(DailyState {
                date: Local::now().date_naive() - chrono::Duration::days(1),
                outfit: "yellow raincoat".to_string(),
                schedule: "museum day".to_string(),
                generated_at: Local::now() - chrono::Duration::days(1),
                manual: false,
            })
            .unwrap();

        life.ensure_fresh().await.unwrap();
        assert!(llm.last_prompt().contains("yellow raincoat"));
    }

    #[tokio::test]
    async fn test_injection_present_after_success_and_absent_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let life = fixture(dir.path(), MockLlm::replying(REPLY));
        let block = life.injection().await.unwrap();
        assert!(block.contains("linen shirt"));

        let dir = tempfile::tempdir().unwrap();
        let life = fixture(dir.path(), MockLlm::failing());
        assert!(life.injection().await.is_none());
    }

    #[tokio::test]
    async fn test_set_schedule_time_persists_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let life = fixture(dir.path(), MockLlm::replying(REPLY));

        assert_eq!(life.set_schedule_time("08:15").await.unwrap(), (8, 15));
        assert_eq!(life.schedule_time().await, (8, 15));
        let saved = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert!(saved.contains("08:15"));

        assert!(life.set_schedule_time("25:99").await.is_err());
        assert_eq!(life.schedule_time().await, (8, 15));
    }
}
