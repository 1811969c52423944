//! Session lifecycle: creation, cross-channel continuity, history and
//! compaction.
//!
//! State machine: `active` → `closed` | `expired`. Terminal sessions are
//! never resumed; a new session is opened instead. `idle` exists for manual
//! tooling only and nothing in here produces it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use orgclaw_core::error::SessionError;
use orgclaw_core::event::{DomainEvent, EventBus};
use orgclaw_core::session::{Role, Session, SessionMessage, SessionStatus};
use orgclaw_core::store::SessionStore;
use tracing::{debug, info};

use crate::token::estimate_tokens;

type SessionResult<T> = Result<T, SessionError>;

/// Longest user turn quoted verbatim in an extractive summary.
const SUMMARY_USER_CHARS: usize = 120;
/// Longest assistant turn quoted verbatim in an extractive summary.
const SUMMARY_ASSISTANT_CHARS: usize = 80;
const SUMMARY_MAX_LINES: usize = 20;

/// Tunables for the session manager.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How long an active session on another channel may be resumed
    pub continuity_window: Duration,
    /// Live token total above which a session should be compacted
    pub compaction_threshold_tokens: u64,
    /// Messages kept verbatim by compaction
    pub keep_recent_messages: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            continuity_window: Duration::minutes(30),
            compaction_threshold_tokens: 8000,
            keep_recent_messages: 10,
        }
    }
}

/// Options for [`SessionManager::add_message`].
#[derive(Debug, Clone, Default)]
pub struct AddMessageOptions {
    pub channel_type: Option<String>,
    /// Overrides the character-based estimate
    pub token_estimate: Option<u64>,
}

/// Options for [`SessionManager::get_session_history`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryOptions {
    /// Token budget; `None` or `0` means unlimited
    pub max_tokens: Option<u64>,
    pub include_compacted: bool,
}

/// What a compaction pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionOutcome {
    pub compacted: bool,
    pub messages_compacted: u64,
    pub summary: String,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    settings: SessionSettings,
    events: Option<Arc<EventBus>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, settings: SessionSettings) -> Self {
        Self {
            store,
            settings,
            events: None,
        }
    }

    /// Publish session lifecycle events on `bus`.
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Resume or open the session for an instance.
    ///
    /// Resolution order: the active session on the same channel type, then
    /// any active session touched within the continuity window, then a new
    /// session.
    pub async fn get_or_create_session(
        &self,
        instance_id: &str,
        channel_type: &str,
        channel_id: Option<&str>,
    ) -> SessionResult<Session> {
        if let Some(mut session) = self
            .store
            .find_active_session(instance_id, channel_type)
            .await?
        {
            debug!(
                session_id = %session.session_id,
                instance_id,
                channel_type,
                "Resuming active session on same channel"
            );
            session.touch();
            self.store.update_session(&session).await?;
            return Ok(session);
        }

        let since = Utc::now()
            .checked_sub_signed(self.settings.continuity_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if let Some(mut session) = self
            .store
            .find_recent_active_session(instance_id, since)
            .await?
        {
            debug!(
                session_id = %session.session_id,
                instance_id,
                from_channel = %session.channel_type,
                to_channel = channel_type,
                "Continuing session from different channel"
            );
            session.touch();
            self.store.update_session(&session).await?;
            return Ok(session);
        }

        let session = Session::new(instance_id, channel_type, channel_id.map(str::to_string));
        self.store.insert_session(&session).await?;
        info!(
            session_id = %session.session_id,
            instance_id,
            channel_type,
            "Created new session"
        );
        self.publish(DomainEvent::SessionStarted {
            session_id: session.session_id.clone(),
            instance_id: instance_id.to_string(),
            channel_type: channel_type.to_string(),
            timestamp: session.started_at,
        });
        Ok(session)
    }

    /// Append a turn and refresh the session's counters.
    pub async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        opts: AddMessageOptions,
    ) -> SessionResult<SessionMessage> {
        let mut session = self.require(session_id).await?;

        let estimate = opts
            .token_estimate
            .unwrap_or_else(|| estimate_tokens(content));
        let message = SessionMessage::new(session_id, role, content, opts.channel_type, estimate);
        self.store.insert_message(&message).await?;

        let live = self.store.list_messages(session_id, false).await?;
        recount(&mut session, &live);
        session.touch();
        self.store.update_session(&session).await?;

        Ok(message)
    }

    /// Chronological history, optionally trimmed to a token budget.
    ///
    /// With a budget, messages are accepted newest-first while they fit and
    /// the walk stops at the first one that does not.
    pub async fn get_session_history(
        &self,
        session_id: &str,
        opts: HistoryOptions,
    ) -> SessionResult<Vec<SessionMessage>> {
        let messages = self
            .store
            .list_messages(session_id, opts.include_compacted)
            .await?;

        match opts.max_tokens {
            Some(budget) if budget > 0 => Ok(fit_to_budget(messages, budget)),
            _ => Ok(messages),
        }
    }

    /// Fold everything but the newest messages into the session summary.
    pub async fn compact_session(&self, session_id: &str) -> SessionResult<CompactionOutcome> {
        let Some(mut session) = self.store.get_session(session_id).await? else {
            return Ok(CompactionOutcome::default());
        };

        let messages = self.store.list_messages(session_id, false).await?;
        let keep = self.settings.keep_recent_messages;
        if messages.len() <= keep {
            return Ok(CompactionOutcome::default());
        }

        let cutoff = messages.len() - keep;
        let (older, recent) = messages.split_at(cutoff);
        let summary = summarize(older);

        let ids: Vec<String> = older.iter().map(|m| m.message_id.clone()).collect();
        let compacted = self.store.mark_compacted(&ids).await?;

        session.summary = Some(match session.summary.take() {
            Some(prior) if !prior.is_empty() => format!("{prior}\n\n---\n\n{summary}"),
            _ => summary.clone(),
        });
        recount(&mut session, recent);
        session.touch();
        self.store.update_session(&session).await?;

        info!(
            session_id,
            messages_compacted = compacted,
            summary_length = summary.len(),
            "Session compacted"
        );
        self.publish(DomainEvent::SessionCompacted {
            session_id: session_id.to_string(),
            compacted_messages: compacted as usize,
            timestamp: Utc::now(),
        });

        Ok(CompactionOutcome {
            compacted: true,
            messages_compacted: compacted,
            summary,
        })
    }

    /// Whether the live token total is above the compaction threshold.
    pub async fn needs_compaction(&self, session_id: &str) -> SessionResult<bool> {
        let live = self.store.list_messages(session_id, false).await?;
        let total: u64 = live.iter().map(|m| m.token_estimate).sum();
        Ok(total > self.settings.compaction_threshold_tokens)
    }

    /// Close a session with a final summary of its live messages.
    pub async fn close_session(&self, session_id: &str) -> SessionResult<()> {
        let mut session = self.require(session_id).await?;
        let live = self.store.list_messages(session_id, false).await?;

        session.summary = Some(if live.is_empty() {
            "Empty session".to_string()
        } else {
            summarize(&live)
        });
        session.status = SessionStatus::Closed;
        session.touch();
        self.store.update_session(&session).await?;

        info!(session_id, "Session closed");
        Ok(())
    }

    /// Expire every active session idle for longer than `minutes_idle`.
    ///
    /// `0` expires every active session. An idle period reaching past the
    /// representable calendar expires nothing.
    pub async fn expire_stale_sessions(&self, minutes_idle: i64) -> SessionResult<u64> {
        let minutes_idle = minutes_idle.max(0);
        let cutoff = minutes_before_now(minutes_idle);
        let count = self
            .store
            .expire_idle_sessions(cutoff, minutes_idle == 0)
            .await?;
        if count > 0 {
            info!(count, minutes_idle, "Expired stale sessions");
        }
        Ok(count)
    }

    /// Sessions of any status, most recently active first.
    pub async fn recent_sessions(
        &self,
        instance_id: &str,
        limit: usize,
    ) -> SessionResult<Vec<Session>> {
        Ok(self.store.list_recent_sessions(instance_id, limit).await?)
    }

    /// Render the conversation-history section of the system prompt.
    ///
    /// The summary goes first if it fits; recent messages fill what is left.
    /// A budget of `0` is unlimited. Empty when the session is unknown or
    /// nothing fits.
    pub async fn build_session_prompt(
        &self,
        session_id: &str,
        token_budget: u64,
    ) -> SessionResult<String> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(String::new());
        };

        let mut remaining = (token_budget > 0).then_some(token_budget);
        let mut parts: Vec<String> = Vec::new();

        if let Some(summary) = session.summary.as_deref().filter(|s| !s.is_empty()) {
            let cost = estimate_tokens(summary);
            if remaining.is_none_or(|r| cost <= r) {
                parts.push("### Earlier in this conversation (summary)".into());
                parts.push(summary.to_string());
                parts.push(String::new());
                remaining = remaining.map(|r| r - cost);
            }
        }

        let messages = match remaining {
            Some(0) => Vec::new(),
            budget => {
                self.get_session_history(
                    session_id,
                    HistoryOptions {
                        max_tokens: budget,
                        include_compacted: false,
                    },
                )
                .await?
            }
        };

        if !messages.is_empty() {
            parts.push("### Recent messages".into());
            for msg in &messages {
                let tag = msg
                    .channel_type
                    .as_deref()
                    .map(|c| format!(" [{c}]"))
                    .unwrap_or_default();
                parts.push(format!("{}{tag}: {}", msg.role, msg.content));
            }
            parts.push(String::new());
        }

        if parts.is_empty() {
            return Ok(String::new());
        }

        let mut lines = vec!["## Conversation History".to_string(), String::new()];
        lines.extend(parts);
        Ok(lines.join("\n"))
    }

    async fn require(&self, session_id: &str) -> SessionResult<Session> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

/// `now - minutes`, clamped to the earliest representable instant.
fn minutes_before_now(minutes: i64) -> DateTime<Utc> {
    Duration::try_minutes(minutes)
        .and_then(|d| Utc::now().checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn recount(session: &mut Session, live: &[SessionMessage]) {
    session.message_count = live.len() as u64;
    session.token_count = live.iter().map(|m| m.token_estimate).sum();
}

fn fit_to_budget(messages: Vec<SessionMessage>, budget: u64) -> Vec<SessionMessage> {
    let mut remaining = budget;
    let mut fitted = Vec::new();
    for msg in messages.into_iter().rev() {
        if msg.token_estimate > remaining {
            break;
        }
        remaining -= msg.token_estimate;
        fitted.push(msg);
    }
    fitted.reverse();
    fitted
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Extractive summary: one line per user turn, a short note per reply.
pub fn summarize(messages: &[SessionMessage]) -> String {
    let mut lines: Vec<String> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::User => {
                lines.push(format!(
                    "- User asked: \"{}\"",
                    truncate_chars(&msg.content, SUMMARY_USER_CHARS)
                ));
            }
            // A reply with no preceding question adds nothing
            Role::Assistant if !lines.is_empty() => {
                lines.push(format!(
                    "  Assistant: \"{}\"",
                    truncate_chars(&msg.content, SUMMARY_ASSISTANT_CHARS)
                ));
            }
            _ => {}
        }
    }

    let mut out = vec![format!("Summary of {} messages:", messages.len())];
    if lines.len() > SUMMARY_MAX_LINES {
        let extra = lines.len() - SUMMARY_MAX_LINES;
        out.extend(lines.into_iter().take(SUMMARY_MAX_LINES));
        out.push(format!("... and {extra} more exchanges"));
    } else {
        out.extend(lines);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgclaw_store::InMemoryStore;

    fn manager() -> (Arc<InMemoryStore>, SessionManager) {
        let store = Arc::new(InMemoryStore::new());
        let mgr = SessionManager::new(store.clone(), SessionSettings::default());
        (store, mgr)
    }

    async fn backdate(store: &InMemoryStore, session_id: &str, minutes: i64) {
        let mut s = store.get_session(session_id).await.unwrap().unwrap();
        s.last_activity_at = Utc::now() - Duration::minutes(minutes);
        store.update_session(&s).await.unwrap();
    }

    fn opts(tokens: u64) -> AddMessageOptions {
        AddMessageOptions {
            channel_type: Some("cli".into()),
            token_estimate: Some(tokens),
        }
    }

    #[tokio::test]
    async fn creates_then_resumes_on_same_channel() {
        let (_, mgr) = manager();
        let first = mgr.get_or_create_session("inst-1", "slack", Some("U1")).await.unwrap();
        assert_eq!(first.status, SessionStatus::Active);
        assert_eq!(first.channel_id.as_deref(), Some("U1"));

        let again = mgr.get_or_create_session("inst-1", "slack", None).await.unwrap();
        assert_eq!(again.session_id, first.session_id);
        assert!(again.last_activity_at >= first.last_activity_at);
    }

    #[tokio::test]
    async fn continues_across_channels_within_window() {
        let (store, mgr) = manager();
        let slack = mgr.get_or_create_session("inst-1", "slack", None).await.unwrap();
        backdate(&store, &slack.session_id, 10).await;

        let email = mgr.get_or_create_session("inst-1", "email", None).await.unwrap();
        assert_eq!(email.session_id, slack.session_id);
        assert_eq!(email.channel_type, "slack");
    }

    #[tokio::test]
    async fn opens_new_session_outside_window() {
        let (store, mgr) = manager();
        let slack = mgr.get_or_create_session("inst-1", "slack", None).await.unwrap();
        backdate(&store, &slack.session_id, 45).await;

        let email = mgr.get_or_create_session("inst-1", "email", None).await.unwrap();
        assert_ne!(email.session_id, slack.session_id);
        assert_eq!(email.channel_type, "email");
    }

    #[tokio::test]
    async fn closed_sessions_never_resume() {
        let (_, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        mgr.close_session(&s.session_id).await.unwrap();

        let next = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        assert_ne!(next.session_id, s.session_id);
    }

    #[tokio::test]
    async fn new_session_publishes_event() {
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(EventBus::new(8));
        let mut rx = bus.subscribe();
        let mgr = SessionManager::new(store, SessionSettings::default()).with_events(bus);

        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::SessionStarted { session_id, .. } => {
                assert_eq!(session_id, &s.session_id)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_message_estimates_and_recounts() {
        let (store, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();

        let msg = mgr
            .add_message(&s.session_id, Role::User, "hello", AddMessageOptions::default())
            .await
            .unwrap();
        assert_eq!(msg.token_estimate, 2);

        mgr.add_message(&s.session_id, Role::Assistant, "hi there", opts(7))
            .await
            .unwrap();

        let stored = store.get_session(&s.session_id).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 2);
        assert_eq!(stored.token_count, 9);
    }

    #[tokio::test]
    async fn add_message_to_unknown_session_fails() {
        let (_, mgr) = manager();
        let err = mgr
            .add_message("missing", Role::User, "hi", AddMessageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn history_budget_stops_at_first_overflow() {
        let (_, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        for (text, tokens) in [("a", 5), ("b", 50), ("c", 10), ("d", 10)] {
            mgr.add_message(&s.session_id, Role::User, text, opts(tokens))
                .await
                .unwrap();
        }

        let fitted = mgr
            .get_session_history(
                &s.session_id,
                HistoryOptions {
                    max_tokens: Some(30),
                    include_compacted: false,
                },
            )
            .await
            .unwrap();
        let contents: Vec<_> = fitted.iter().map(|m| m.content.as_str()).collect();
        // "a" would fit, but "b" overflows first
        assert_eq!(contents, ["c", "d"]);

        let all = mgr
            .get_session_history(&s.session_id, HistoryOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }

    #[tokio::test]
    async fn compaction_keeps_recent_and_appends_summary() {
        let (store, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        for i in 0..12 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            mgr.add_message(&s.session_id, role, &format!("turn {i}"), opts(100))
                .await
                .unwrap();
        }

        let outcome = mgr.compact_session(&s.session_id).await.unwrap();
        assert!(outcome.compacted);
        assert_eq!(outcome.messages_compacted, 2);
        assert!(outcome.summary.starts_with("Summary of 2 messages:"));
        assert!(outcome.summary.contains("- User asked: \"turn 0\""));
        assert!(outcome.summary.contains("  Assistant: \"turn 1\""));

        let stored = store.get_session(&s.session_id).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 10);
        assert_eq!(stored.token_count, 1000);
        assert_eq!(stored.summary.as_deref(), Some(outcome.summary.as_str()));

        let all = mgr
            .get_session_history(
                &s.session_id,
                HistoryOptions {
                    max_tokens: None,
                    include_compacted: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 12);

        // Second pass appends with a separator
        for _ in 0..3 {
            mgr.add_message(&s.session_id, Role::User, "more", opts(1))
                .await
                .unwrap();
        }
        let second = mgr.compact_session(&s.session_id).await.unwrap();
        assert_eq!(second.messages_compacted, 3);
        let stored = store.get_session(&s.session_id).await.unwrap().unwrap();
        assert!(stored.summary.unwrap().contains("\n\n---\n\n"));
    }

    #[tokio::test]
    async fn compaction_is_noop_for_short_or_unknown_sessions() {
        let (_, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        for _ in 0..10 {
            mgr.add_message(&s.session_id, Role::User, "x", opts(1)).await.unwrap();
        }
        assert_eq!(
            mgr.compact_session(&s.session_id).await.unwrap(),
            CompactionOutcome::default()
        );
        assert!(!mgr.compact_session("missing").await.unwrap().compacted);
    }

    #[tokio::test]
    async fn needs_compaction_above_threshold() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = SessionManager::new(
            store,
            SessionSettings {
                compaction_threshold_tokens: 100,
                ..SessionSettings::default()
            },
        );
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        mgr.add_message(&s.session_id, Role::User, "x", opts(100)).await.unwrap();
        assert!(!mgr.needs_compaction(&s.session_id).await.unwrap());
        mgr.add_message(&s.session_id, Role::User, "y", opts(1)).await.unwrap();
        assert!(mgr.needs_compaction(&s.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn close_writes_final_summary() {
        let (store, mgr) = manager();
        let empty = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        mgr.close_session(&empty.session_id).await.unwrap();
        let stored = store.get_session(&empty.session_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Closed);
        assert_eq!(stored.summary.as_deref(), Some("Empty session"));

        assert!(matches!(
            mgr.close_session("missing").await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn expiry_respects_cutoff() {
        let (store, mgr) = manager();
        let old = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        let fresh = mgr.get_or_create_session("inst-2", "cli", None).await.unwrap();
        backdate(&store, &old.session_id, 180).await;

        assert_eq!(mgr.expire_stale_sessions(120).await.unwrap(), 1);
        let old = store.get_session(&old.session_id).await.unwrap().unwrap();
        assert_eq!(old.status, SessionStatus::Expired);

        assert_eq!(mgr.expire_stale_sessions(0).await.unwrap(), 1);
        let fresh = store.get_session(&fresh.session_id).await.unwrap().unwrap();
        assert_eq!(fresh.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn expiry_with_huge_idle_period_expires_nothing() {
        let (store, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        backdate(&store, &s.session_id, 60 * 24 * 365).await;

        assert_eq!(mgr.expire_stale_sessions(i64::MAX / 2).await.unwrap(), 0);
        assert_eq!(mgr.expire_stale_sessions(300_000_000_000).await.unwrap(), 0);
        assert_eq!(mgr.expire_stale_sessions(i64::MAX).await.unwrap(), 0);

        let stored = store.get_session(&s.session_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn huge_continuity_window_resumes_any_active_session() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = SessionManager::new(
            store.clone(),
            SessionSettings {
                continuity_window: Duration::MAX,
                ..SessionSettings::default()
            },
        );
        let slack = mgr.get_or_create_session("inst-1", "slack", None).await.unwrap();
        backdate(&store, &slack.session_id, 60 * 24 * 365).await;

        let email = mgr.get_or_create_session("inst-1", "email", None).await.unwrap();
        assert_eq!(email.session_id, slack.session_id);
    }

    #[tokio::test]
    async fn larger_history_budget_never_returns_fewer_messages() {
        let (_, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        for (i, tokens) in [7, 3, 12, 1, 5, 9, 2, 4].into_iter().enumerate() {
            mgr.add_message(&s.session_id, Role::User, &format!("m{i}"), opts(tokens))
                .await
                .unwrap();
        }
        let all: Vec<String> = mgr
            .get_session_history(&s.session_id, HistoryOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();

        let mut previous = 0;
        for budget in 1..=50 {
            let fitted: Vec<String> = mgr
                .get_session_history(
                    &s.session_id,
                    HistoryOptions {
                        max_tokens: Some(budget),
                        include_compacted: false,
                    },
                )
                .await
                .unwrap()
                .into_iter()
                .map(|m| m.content)
                .collect();

            assert!(all.ends_with(&fitted), "budget {budget} gave {fitted:?}");
            assert!(fitted.len() >= previous, "budget {budget} shrank the history");
            previous = fitted.len();
        }
        assert_eq!(previous, all.len());
    }

    #[tokio::test]
    async fn summarized_session_prompt_at_large_and_tiny_budgets() {
        let (store, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        for i in 0..10 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            mgr.add_message(&s.session_id, role, &format!("verbatim {i}"), opts(20))
                .await
                .unwrap();
        }
        let mut stored = store.get_session(&s.session_id).await.unwrap().unwrap();
        stored.summary = Some("Summary of 15 messages:\n- User asked: \"plan Q3\"".into());
        store.update_session(&stored).await.unwrap();

        let prompt = mgr.build_session_prompt(&s.session_id, 5000).await.unwrap();
        assert!(prompt.contains("### Earlier in this conversation (summary)"));
        assert!(prompt.contains("Summary of 15 messages:"));
        assert!(prompt.contains("assistant [cli]: verbatim 9"));

        assert_eq!(mgr.build_session_prompt(&s.session_id, 1).await.unwrap(), "");
    }

    #[tokio::test]
    async fn session_prompt_layout() {
        let (store, mgr) = manager();
        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        mgr.add_message(&s.session_id, Role::User, "What is due?", opts(3))
            .await
            .unwrap();
        mgr.add_message(
            &s.session_id,
            Role::Assistant,
            "The Q3 report.",
            AddMessageOptions {
                channel_type: None,
                token_estimate: Some(4),
            },
        )
        .await
        .unwrap();

        let mut stored = store.get_session(&s.session_id).await.unwrap().unwrap();
        stored.summary = Some("Earlier chat".into());
        store.update_session(&stored).await.unwrap();

        let prompt = mgr.build_session_prompt(&s.session_id, 2000).await.unwrap();
        assert_eq!(
            prompt,
            "## Conversation History\n\n\
             ### Earlier in this conversation (summary)\nEarlier chat\n\n\
             ### Recent messages\nuser [cli]: What is due?\nassistant: The Q3 report.\n"
        );
    }

    #[tokio::test]
    async fn session_prompt_empty_when_nothing_fits() {
        let (_, mgr) = manager();
        assert_eq!(mgr.build_session_prompt("missing", 100).await.unwrap(), "");

        let s = mgr.get_or_create_session("inst-1", "cli", None).await.unwrap();
        assert_eq!(mgr.build_session_prompt(&s.session_id, 100).await.unwrap(), "");

        mgr.add_message(&s.session_id, Role::User, "big", opts(500)).await.unwrap();
        assert_eq!(mgr.build_session_prompt(&s.session_id, 100).await.unwrap(), "");
    }

    #[test]
    fn summary_truncates_and_caps_lines() {
        let long = "x".repeat(130);
        let mut msgs = vec![SessionMessage::new("s", Role::Assistant, "orphan", None, 1)];
        msgs.push(SessionMessage::new("s", Role::User, long.as_str(), None, 1));
        let summary = summarize(&msgs);
        assert!(!summary.contains("orphan"));
        assert!(summary.contains(&format!("\"{}...\"", "x".repeat(120))));

        let many: Vec<_> = (0..25)
            .map(|i| SessionMessage::new("s", Role::User, format!("q{i}"), None, 1))
            .collect();
        let summary = summarize(&many);
        assert!(summary.starts_with("Summary of 25 messages:"));
        assert!(summary.ends_with("... and 5 more exchanges"));
        assert_eq!(summary.lines().count(), 22);
    }
}
