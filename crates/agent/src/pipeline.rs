//! The message pipeline: one inbound message in, one reply out.
//!
//! Steps run strictly in order and short-circuit on the first hard failure:
//! routing, tenant resolution, status check, consent, enrichment (session,
//! memory, org context, skill), model execution, delivery, then isolated
//! post-processing. Enrichment and post-processing failures are logged and
//! never fail the turn.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use orgclaw_config::AppConfig;
use orgclaw_core::agent::AgentExecutor;
use orgclaw_core::channel::{Channel, ChannelMessage};
use orgclaw_core::consent::ConsentType;
use orgclaw_core::error::ExecutionError;
use orgclaw_core::event::{DomainEvent, EventBus};
use orgclaw_core::pattern::{MetricType, PatternType};
use orgclaw_core::session::Role;
use orgclaw_core::store::{PatternStore, RecordStore};
use orgclaw_core::tenant::{InstanceStatus, UserInstance};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classify::{Category, Classifier, KeywordClassifier};
use crate::consent::ConsentManager;
use crate::context::{ContextSupplier, OrgContext, build_context_prompt};
use crate::memory::{MemoryManager, StoreOptions, extract_memories};
use crate::pattern::{PatternParams, build_pattern_record};
use crate::prompt::{PromptSections, build_system_prompt};
use crate::session::{AddMessageOptions, SessionManager, SessionSettings};
use crate::skills::SkillRegistry;
use crate::tenant::{TenantResolver, parse_routing_key};

pub const UNKNOWN_USER_NOTICE: &str =
    "I don't recognize your account yet. Please contact your administrator to get set up.";
pub const CONSENT_NOTICE: &str = "Before I can assist you, I need your consent to process your messages. Please grant data processing consent through your settings or contact your administrator.";
pub const EXECUTION_FAILED_NOTICE: &str =
    "Sorry, I encountered an error processing your request. Please try again.";

fn inactive_notice(status: InstanceStatus) -> String {
    format!("Your account is currently {status}. Please contact your administrator.")
}

/// Why a turn did not complete.
#[derive(Debug, Clone, Error)]
pub enum PipelineFailure {
    #[error("Invalid routing key: {0}")]
    InvalidRoutingKey(String),

    #[error("Tenant lookup failed: {0}")]
    TenantLookupFailed(String),

    #[error("Unknown user")]
    UnknownUser,

    #[error("Instance status: {0}")]
    InstanceNotActive(InstanceStatus),

    #[error("Consent required: {0}")]
    ConsentRequired(ConsentType),

    #[error("Agent execution failed: {0}")]
    AgentExecutionFailed(ExecutionError),

    #[error("Failed to deliver response: {0}")]
    DeliveryFailed(String),
}

/// Outcome of one turn.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub success: bool,
    /// The model's reply, kept even when delivery failed
    pub response: Option<String>,
    pub error: Option<PipelineFailure>,
    pub instance_id: Option<String>,
    pub skill_id: Option<String>,
    pub category: Option<Category>,
    /// Wall time from receipt to the model's reply
    pub duration_ms: Option<u64>,
}

impl PipelineResult {
    fn failed(error: PipelineFailure) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    fn failed_for(instance: &UserInstance, error: PipelineFailure) -> Self {
        Self {
            error: Some(error),
            instance_id: Some(instance.instance_id.clone()),
            ..Self::default()
        }
    }
}

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub session: SessionSettings,
    /// Token budget for the conversation-history prompt section
    pub session_prompt_budget: u64,
    /// Recalled memories per prompt
    pub memory_recall_limit: usize,
    /// Mine user messages for memories after each turn
    pub auto_extract_memories: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            session_prompt_budget: 2000,
            memory_recall_limit: 5,
            auto_extract_memories: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            session: SessionSettings {
                continuity_window: chrono::Duration::try_minutes(
                    config.session.continuity_window_minutes,
                )
                .unwrap_or(chrono::Duration::MAX),
                compaction_threshold_tokens: config.session.compaction_threshold_tokens,
                keep_recent_messages: config.session.keep_recent_messages,
            },
            session_prompt_budget: config.session.history_token_budget,
            memory_recall_limit: config.memory.recall_limit,
            auto_extract_memories: config.memory.auto_extract,
        }
    }
}

pub struct MessagePipeline {
    tenants: TenantResolver,
    sessions: SessionManager,
    memory: MemoryManager,
    consent: ConsentManager,
    patterns: Arc<dyn PatternStore>,
    channel: Arc<dyn Channel>,
    executor: Arc<dyn AgentExecutor>,
    skills: Arc<SkillRegistry>,
    context: Arc<dyn ContextSupplier>,
    classifier: Arc<dyn Classifier>,
    events: Option<Arc<EventBus>>,
    config: PipelineConfig,
}

impl MessagePipeline {
    /// Wire a pipeline over one record store.
    pub fn new<S: RecordStore + 'static>(
        store: Arc<S>,
        channel: Arc<dyn Channel>,
        executor: Arc<dyn AgentExecutor>,
        skills: Arc<SkillRegistry>,
        context: Arc<dyn ContextSupplier>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            tenants: TenantResolver::new(store.clone()),
            sessions: SessionManager::new(store.clone(), config.session.clone()),
            memory: MemoryManager::new(store.clone())
                .with_prompt_recall_limit(config.memory_recall_limit),
            consent: ConsentManager::new(store.clone()),
            patterns: store,
            channel,
            executor,
            skills,
            context,
            classifier: Arc::new(KeywordClassifier),
            events: None,
            config,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Publish turn milestones on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.sessions = self.sessions.with_events(bus.clone());
        self.events = Some(bus);
        self
    }

    /// The session manager the pipeline records turns through.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Process one inbound message end to end.
    pub async fn handle_inbound(&self, message: &ChannelMessage) -> PipelineResult {
        let result = self.process(message).await;
        if let Some(err) = &result.error {
            self.publish(DomainEvent::PipelineFailed {
                routing_key: message.routing_key.clone(),
                reason: err.to_string(),
                timestamp: Utc::now(),
            });
        }
        result
    }

    async fn process(&self, message: &ChannelMessage) -> PipelineResult {
        let started = Instant::now();
        let routing_key = message.routing_key.as_str();

        self.publish(DomainEvent::MessageReceived {
            routing_key: routing_key.to_string(),
            sender_id: message.sender_id.clone(),
            content_preview: message.content.chars().take(80).collect(),
            timestamp: message.timestamp,
        });

        // 1. Routing
        let Some(parsed) = parse_routing_key(routing_key) else {
            warn!(routing_key, "Invalid routing key, cannot route message");
            return PipelineResult::failed(PipelineFailure::InvalidRoutingKey(
                routing_key.to_string(),
            ));
        };

        // 2. Tenant
        let instance = match self
            .tenants
            .resolve_user_instance(&parsed.channel, &parsed.org_ref, &message.sender_id)
            .await
        {
            Ok(Some(instance)) => instance,
            Ok(None) => {
                info!(
                    routing_key,
                    sender = %message.sender_id,
                    channel = %parsed.channel,
                    "Unknown user, no channel binding"
                );
                self.notify(routing_key, UNKNOWN_USER_NOTICE).await;
                return PipelineResult::failed(PipelineFailure::UnknownUser);
            }
            Err(e) => {
                error!(routing_key, error = %e, "Tenant lookup failed");
                return PipelineResult::failed(PipelineFailure::TenantLookupFailed(e.to_string()));
            }
        };

        // 3. Status
        if !instance.is_active() {
            info!(
                instance_id = %instance.instance_id,
                status = %instance.status,
                "User instance is not active"
            );
            self.notify(routing_key, &inactive_notice(instance.status)).await;
            return PipelineResult::failed_for(
                &instance,
                PipelineFailure::InstanceNotActive(instance.status),
            );
        }

        // 4. Consent
        if !self
            .consent_granted(&instance, ConsentType::DataProcessing)
            .await
        {
            info!(
                instance_id = %instance.instance_id,
                "User has not granted data_processing consent"
            );
            self.notify(routing_key, CONSENT_NOTICE).await;
            return PipelineResult::failed_for(
                &instance,
                PipelineFailure::ConsentRequired(ConsentType::DataProcessing),
            );
        }

        // 5. Session
        let (session_id, session_prompt) = match self
            .record_user_turn(&instance, &parsed.channel, &parsed.user_ref, &message.content)
            .await
        {
            Ok((id, prompt)) => (Some(id), prompt),
            Err(e) => {
                warn!(
                    instance_id = %instance.instance_id,
                    error = %e,
                    "Session management failed, proceeding without session context"
                );
                (None, String::new())
            }
        };

        // 6. Memory
        let memory_prompt = self
            .memory
            .build_memory_prompt(&instance.instance_id, Some(&message.content))
            .await
            .unwrap_or_else(|e| {
                warn!(
                    instance_id = %instance.instance_id,
                    error = %e,
                    "Memory recall failed, proceeding without memory context"
                );
                String::new()
            });

        // 7. Org context
        let org_context = self
            .context
            .org_context(&instance.org_id, Some(&message.content))
            .await
            .unwrap_or_else(|e| {
                warn!(
                    org_id = %instance.org_id,
                    error = %e,
                    "Failed to assemble org context, proceeding without it"
                );
                OrgContext::default()
            });
        let context_prompt = build_context_prompt(&org_context);

        // 8. Skill
        let skill = self.skills.match_message(&message.content);
        if let Some(skill) = skill {
            info!(
                instance_id = %instance.instance_id,
                skill = %skill.name,
                skill_id = %skill.id,
                "Skill matched for message"
            );
        }
        let skill_id = skill.map(|s| s.id.clone());

        // 9. Prompt
        let system_prompt = build_system_prompt(
            &instance,
            PromptSections {
                context: &context_prompt,
                memory: &memory_prompt,
                session: &session_prompt,
                skill,
            },
        );

        // 10. Execute
        let reply = match self
            .executor
            .execute(&system_prompt, &message.content, &instance)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    instance_id = %instance.instance_id,
                    executor = %self.executor.name(),
                    error = %e,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Agent execution failed"
                );
                self.notify(routing_key, EXECUTION_FAILED_NOTICE).await;
                return PipelineResult {
                    skill_id,
                    ..PipelineResult::failed_for(
                        &instance,
                        PipelineFailure::AgentExecutionFailed(e),
                    )
                };
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        // 11. Deliver
        if let Err(e) = self.channel.send(routing_key, &reply).await {
            error!(
                routing_key,
                error = %e,
                response_length = reply.len(),
                "Failed to send agent response"
            );
            return PipelineResult {
                response: Some(reply),
                skill_id,
                duration_ms: Some(duration_ms),
                ..PipelineResult::failed_for(
                    &instance,
                    PipelineFailure::DeliveryFailed(e.to_string()),
                )
            };
        }

        if let Some(session_id) = &session_id {
            self.publish(DomainEvent::ResponseDelivered {
                session_id: session_id.clone(),
                instance_id: instance.instance_id.clone(),
                skill: skill_id.clone(),
                duration_ms,
                timestamp: Utc::now(),
            });
        }

        // 12. Post-processing
        if let Some(session_id) = &session_id {
            self.record_assistant_turn(session_id, &parsed.channel, &reply)
                .await;
        }
        if self.config.auto_extract_memories {
            self.remember(&instance, &parsed.channel, &message.content, &reply)
                .await;
        }
        let category = self.classifier.classify(&message.content, &reply);
        self.log_pattern(&instance, category, duration_ms).await;

        info!(
            instance_id = %instance.instance_id,
            session_id = session_id.as_deref().unwrap_or_default(),
            duration_ms,
            category = %category,
            skill_id = skill_id.as_deref().unwrap_or_default(),
            "Message pipeline completed"
        );

        PipelineResult {
            success: true,
            response: Some(reply),
            error: None,
            instance_id: Some(instance.instance_id),
            skill_id,
            category: Some(category),
            duration_ms: Some(duration_ms),
        }
    }

    async fn record_user_turn(
        &self,
        instance: &UserInstance,
        channel: &str,
        user_ref: &str,
        content: &str,
    ) -> Result<(String, String), orgclaw_core::error::SessionError> {
        let session = self
            .sessions
            .get_or_create_session(&instance.instance_id, channel, Some(user_ref))
            .await?;
        self.sessions
            .add_message(
                &session.session_id,
                Role::User,
                content,
                AddMessageOptions {
                    channel_type: Some(channel.to_string()),
                    token_estimate: None,
                },
            )
            .await?;
        let prompt = self
            .sessions
            .build_session_prompt(&session.session_id, self.config.session_prompt_budget)
            .await?;
        Ok((session.session_id, prompt))
    }

    async fn record_assistant_turn(&self, session_id: &str, channel: &str, reply: &str) {
        let outcome = async {
            self.sessions
                .add_message(
                    session_id,
                    Role::Assistant,
                    reply,
                    AddMessageOptions {
                        channel_type: Some(channel.to_string()),
                        token_estimate: None,
                    },
                )
                .await?;
            if self.sessions.needs_compaction(session_id).await? {
                self.sessions.compact_session(session_id).await?;
            }
            Ok::<_, orgclaw_core::error::SessionError>(())
        }
        .await;

        if let Err(e) = outcome {
            warn!(session_id, error = %e, "Failed to record assistant response in session");
        }
    }

    async fn remember(&self, instance: &UserInstance, channel: &str, user_text: &str, reply: &str) {
        let mut stored = 0;
        for found in extract_memories(user_text, reply) {
            let opts = StoreOptions {
                source_channel: Some(channel.to_string()),
                confidence: found.confidence,
                expires_at: None,
            };
            match self
                .memory
                .store(&instance.instance_id, found.memory_type, &found.content, opts)
                .await
            {
                Ok(_) => stored += 1,
                Err(e) => {
                    warn!(instance_id = %instance.instance_id, error = %e, "Failed to store memory");
                }
            }
        }

        if stored > 0 {
            debug!(instance_id = %instance.instance_id, count = stored, "Memories extracted");
            self.publish(DomainEvent::MemoriesExtracted {
                instance_id: instance.instance_id.clone(),
                count: stored,
                timestamp: Utc::now(),
            });
        }
    }

    async fn log_pattern(&self, instance: &UserInstance, category: Category, duration_ms: u64) {
        if !self
            .consent_granted(instance, ConsentType::PatternCollection)
            .await
        {
            debug!(
                instance_id = %instance.instance_id,
                "Skipping pattern logging, pattern_collection consent not granted"
            );
            return;
        }

        let record = build_pattern_record(PatternParams {
            user_id: &instance.user_id,
            org_id: &instance.org_id,
            team_id: &instance.team_id,
            // Per-org salt keeps hashes from correlating across orgs
            user_id_salt: &instance.org_id,
            pattern_type: PatternType::TimeAllocation,
            category_l1: category.as_str(),
            category_l2: "",
            category_l3: "",
            metric_type: MetricType::Duration,
            metric_value: duration_ms as f64,
            tools_involved: &[],
        });

        match self.patterns.insert_pattern(&record).await {
            Ok(()) => debug!(
                instance_id = %instance.instance_id,
                category = %category,
                "Pattern logged"
            ),
            Err(e) => warn!(
                instance_id = %instance.instance_id,
                error = %e,
                "Failed to log pattern"
            ),
        }
    }

    /// Consent check that treats a failed lookup as "not granted".
    async fn consent_granted(&self, instance: &UserInstance, consent_type: ConsentType) -> bool {
        match self
            .consent
            .has_consent(&instance.instance_id, consent_type)
            .await
        {
            Ok(granted) => granted,
            Err(e) => {
                warn!(
                    instance_id = %instance.instance_id,
                    consent_type = %consent_type,
                    error = %e,
                    "Consent lookup failed, treating as not granted"
                );
                false
            }
        }
    }

    /// Best-effort user-facing notice; failures are logged only.
    async fn notify(&self, routing_key: &str, text: &str) {
        if let Err(e) = self.channel.send(routing_key, text).await {
            error!(routing_key, error = %e, "Failed to send notice");
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}
