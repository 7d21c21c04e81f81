//! Per-turn pipeline: session, selection, delegation, extraction,
//! verification and presentation.

use std::sync::Arc;

use envoy_common::{EnvoyError, Result, TurnEvent};
use envoy_llm::{LazyLlmClient, LlmClient};
use envoy_remote::{extract, AgentDirectory, DelegationRequest, ExtractedAnswer, RawAgentResponse};
use futures::future::join_all;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::present::{self, Presentation};
use crate::router::LlmRouter;
use crate::selection::{infer_topic, resolve, targets_for, topic_of, Target, TopicInference};
use crate::session::{ConversationState, InMemorySessionStore, SessionStore};
use crate::verification::{VerificationGate, VerificationVerdict};

/// Pipeline stages in the order a turn passes through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnStage {
    Received,
    SessionResolved,
    AgentSelected,
    Delegated,
    Extracted,
    Verified,
    Presented,
    Alerted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Every answer passed verification
    Verified,
    /// At least one answer was replaced or flagged
    Alerted,
    /// No answer was obtained
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub query: String,
    pub session_id: String,
    /// Skip inference and delegate to this agent (fuzzy-resolved)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl TurnRequest {
    pub fn new(query: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: session_id.into(),
            agent: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub content: String,
    pub status: TurnStatus,
    pub stages: Vec<TurnStage>,
    /// Agents delegated to, in presentation order
    pub agents: Vec<String>,
    pub verdicts: Vec<VerificationVerdict>,
}

/// One agent's contribution to a turn.
struct Section {
    agent: String,
    content: String,
    stages: Vec<TurnStage>,
    verdict: Option<VerificationVerdict>,
    presentation: Option<Presentation>,
}

/// Routes queries to remote agents and gates every answer through verification.
pub struct Orchestrator {
    directory: Arc<AgentDirectory>,
    sessions: Arc<dyn SessionStore>,
    gate: VerificationGate,
    router: Option<LlmRouter>,
}

impl Orchestrator {
    pub fn new(directory: Arc<AgentDirectory>, gate: VerificationGate) -> Self {
        Self {
            directory,
            sessions: Arc::new(InMemorySessionStore::new()),
            gate,
            router: None,
        }
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_router(mut self, router: LlmRouter) -> Self {
        self.router = Some(router);
        self
    }

    /// Wire an orchestrator over an already discovered directory.
    ///
    /// The generation backend is built lazily on the first verification.
    pub fn from_config(config: &CoordinatorConfig, directory: AgentDirectory) -> Self {
        let client: Arc<dyn LlmClient> = Arc::new(LazyLlmClient::new(config.llm.clone()));
        let gate = VerificationGate::new(Arc::clone(&client)).with_policy(config.verification.on_failure);

        let orchestrator = Self::new(Arc::new(directory), gate);
        if config.routing.use_llm {
            info!(model = %config.llm.model, "Model-assisted routing enabled");
            orchestrator.with_router(LlmRouter::new(client))
        } else {
            orchestrator
        }
    }

    /// Discover the configured agents and wire an orchestrator over them.
    pub async fn connect(config: &CoordinatorConfig) -> Self {
        let directory =
            AgentDirectory::discover(&config.discovery.endpoints, &config.discovery_options()).await;
        if directory.is_empty() {
            warn!("No remote agents discovered; every turn will report an error");
        }
        Self::from_config(config, directory)
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    /// Run one turn, yielding a progress event and then exactly one completion.
    pub fn stream(&self, query: String, session_id: String) -> impl Stream<Item = TurnEvent> + Send + '_ {
        let request = TurnRequest::new(query, session_id);
        async_stream::stream! {
            yield TurnEvent::processing();
            let outcome = self.handle_turn(request).await;
            yield TurnEvent::complete(outcome.content);
        }
    }

    /// Run one turn to completion. Never fails; errors become the turn's text.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnOutcome {
        let mut stages = vec![TurnStage::Received];
        info!(
            session_id = %request.session_id,
            query_preview = %request.query.chars().take(50).collect::<String>(),
            requested_agent = ?request.agent,
            "Turn received"
        );

        let state = self.sessions.get_or_create(&request.session_id).await;
        stages.push(TurnStage::SessionResolved);
        debug!(session_id = %state.session_id, task_id = %state.task_id, "Session resolved");

        let targets = match self.select(&request).await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "No agent selected");
                let requested = request.agent.as_deref().unwrap_or_default();
                return TurnOutcome {
                    content: present::failure(requested, &e),
                    status: TurnStatus::Failed,
                    stages,
                    agents: Vec::new(),
                    verdicts: Vec::new(),
                };
            }
        };
        stages.push(TurnStage::AgentSelected);
        debug!(
            agents = ?targets.iter().map(|t| t.agent.name.as_str()).collect::<Vec<_>>(),
            "Agents selected"
        );

        let sections = join_all(
            targets
                .iter()
                .map(|target| self.run_target(&request.query, &state, target)),
        )
        .await;

        let status = if sections.iter().all(|s| s.presentation.is_none()) {
            TurnStatus::Failed
        } else if sections
            .iter()
            .any(|s| s.presentation == Some(Presentation::Alerted))
        {
            TurnStatus::Alerted
        } else {
            TurnStatus::Verified
        };

        let mut agents = Vec::with_capacity(sections.len());
        let mut verdicts = Vec::new();
        let mut contents = Vec::with_capacity(sections.len());
        for section in sections {
            stages.extend(section.stages);
            agents.push(section.agent);
            verdicts.extend(section.verdict);
            contents.push(section.content);
        }

        info!(session_id = %state.session_id, status = ?status, agents = ?agents, "Turn complete");

        TurnOutcome {
            content: contents.join("\n\n"),
            status,
            stages,
            agents,
            verdicts,
        }
    }

    /// Delegate `task` to the named agent and extract its answer text.
    pub async fn send_message(
        &self,
        agent_name: &str,
        task: &str,
        state: &ConversationState,
    ) -> Result<ExtractedAnswer> {
        let agent = resolve(agent_name, &self.directory)?;
        let raw = self.delegate(&agent.name, task, state).await?;
        Ok(extract(&raw))
    }

    async fn select(&self, request: &TurnRequest) -> Result<Vec<Target<'_>>> {
        if let Some(requested) = &request.agent {
            let agent = resolve(requested, &self.directory)?;
            return Ok(vec![Target {
                agent,
                topic: topic_of(agent),
            }]);
        }

        if let Some(router) = &self.router {
            match router.route(&request.query, &self.directory).await {
                Ok(decision) => {
                    if let Some(agent) = self.directory.get(&decision.agent) {
                        return Ok(vec![Target {
                            agent,
                            topic: decision.topic.or_else(|| topic_of(agent)),
                        }]);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Model routing failed, falling back to keyword inference");
                }
            }
        }

        let inference = infer_topic(&request.query);
        let targets = targets_for(inference, &self.directory);
        if targets.is_empty() {
            let requested = match inference {
                TopicInference::Single(topic) => topic.to_string(),
                TopicInference::Ambiguous => "imports or invoices".to_string(),
            };
            return Err(EnvoyError::AgentNotFound {
                requested,
                available: self.directory.names(),
            });
        }
        Ok(targets)
    }

    async fn delegate(
        &self,
        agent_name: &str,
        task: &str,
        state: &ConversationState,
    ) -> Result<RawAgentResponse> {
        let agent = self.directory.get(agent_name).ok_or_else(|| EnvoyError::AgentNotFound {
            requested: agent_name.to_string(),
            available: self.directory.names(),
        })?;
        let request = DelegationRequest::new(&agent.name, task, &state.task_id, &state.context_id);
        agent.connection.send(&request).await
    }

    async fn run_target(&self, query: &str, state: &ConversationState, target: &Target<'_>) -> Section {
        let agent = target.agent.name.clone();
        let mut stages = Vec::new();

        let raw = match self.delegate(&agent, query, state).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(agent = %agent, error = %e, "Delegation failed");
                return Section {
                    content: present::failure(&agent, &e),
                    agent,
                    stages,
                    verdict: None,
                    presentation: None,
                };
            }
        };
        stages.push(TurnStage::Delegated);

        let answer = extract(&raw).text();
        stages.push(TurnStage::Extracted);
        debug!(
            agent = %agent,
            answer_preview = %answer.chars().take(100).collect::<String>(),
            "Answer extracted"
        );

        let verdict = self.gate.verify(query, &answer, &target.expected_topic()).await;
        stages.push(TurnStage::Verified);

        let (content, presentation) = present::present(&agent, &answer, &verdict);
        stages.push(match presentation {
            Presentation::Presented => TurnStage::Presented,
            Presentation::Alerted => TurnStage::Alerted,
        });
        debug!(agent = %agent, presentation = ?presentation, "Answer presented");

        Section {
            agent,
            content,
            stages,
            verdict: Some(verdict),
            presentation: Some(presentation),
        }
    }
}
