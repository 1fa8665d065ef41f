//! Host side of delegation
//!
//! The host discovers specialists, picks a skill for an utterance through an
//! [`IntentResolver`], sends the task and turns the terminal task into a
//! [`DelegationOutcome`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::client::A2aClient;
use crate::protocol::{AgentCard, AgentSkill, TaskSendParams, TaskState};

/// Which skill to use and what to ask it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub skill_id: String,
    /// Text sent to the specialist as the task message
    pub request: String,
}

/// Chooses a skill for an utterance. A language model sits behind this in a
/// full host; [`KeywordResolver`] stands in for it.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn decide(&self, utterance: &str, skills: &[AgentSkill]) -> Option<Decision>;
}

/// Scores skills by how many utterance words appear in their tags or name
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordResolver;

impl KeywordResolver {
    fn keywords(skill: &AgentSkill) -> Vec<String> {
        skill
            .tags
            .iter()
            .chain(std::iter::once(&skill.name))
            .flat_map(|s| s.split_whitespace())
            .map(|w| w.to_ascii_lowercase())
            .filter(|w| w.len() > 2)
            .collect()
    }
}

#[async_trait]
impl IntentResolver for KeywordResolver {
    async fn decide(&self, utterance: &str, skills: &[AgentSkill]) -> Option<Decision> {
        let words: Vec<String> = utterance
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                    .to_ascii_lowercase()
            })
            .filter(|w| w.len() > 2)
            .collect();

        let (best, score) = skills
            .iter()
            .map(|skill| {
                let keywords = Self::keywords(skill);
                let score = words.iter().filter(|w| keywords.contains(w)).count();
                (skill, score)
            })
            // Ties go to the first advertised skill
            .fold(None::<(&AgentSkill, usize)>, |best, (skill, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((skill, score)),
            })?;

        if score == 0 {
            debug!("No skill matched '{}'", utterance);
            return None;
        }
        debug!("Matched '{}' to skill {} (score {})", utterance, best.id, score);
        Some(Decision {
            skill_id: best.id.clone(),
            request: utterance.trim().to_string(),
        })
    }
}

/// A discovered specialist
#[derive(Debug, Clone)]
pub struct Specialist {
    pub url: String,
    pub card: AgentCard,
}

/// What the host gets back from a delegation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DelegationOutcome {
    Success {
        artifact: String,
        data: Map<String, Value>,
    },
    Error {
        message: String,
    },
}

impl DelegationOutcome {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

pub struct HostAgent {
    client: A2aClient,
    specialists: Vec<Specialist>,
}

impl HostAgent {
    /// Discover every URL; unreachable specialists are logged and left out
    pub async fn connect(client: A2aClient, urls: &[String]) -> Self {
        let mut specialists = Vec::new();
        for url in urls {
            match client.discover(url).await {
                Ok(card) => specialists.push(Specialist {
                    url: url.trim_end_matches('/').to_string(),
                    card,
                }),
                Err(e) => warn!(
                    "Specialist at {} unavailable ({}), its skills are disabled: {}",
                    url,
                    e.kind(),
                    e
                ),
            }
        }
        info!(
            "Host connected to {} of {} specialists",
            specialists.len(),
            urls.len()
        );
        Self {
            client,
            specialists,
        }
    }

    pub fn specialists(&self) -> &[Specialist] {
        &self.specialists
    }

    /// Skills offered by all connected specialists
    pub fn skills(&self) -> Vec<AgentSkill> {
        self.specialists
            .iter()
            .flat_map(|s| s.card.skills.iter().cloned())
            .collect()
    }

    fn specialist_for(&self, skill_id: &str) -> Option<&Specialist> {
        self.specialists
            .iter()
            .find(|s| s.card.skills.iter().any(|k| k.id == skill_id))
    }

    /// Send `request` to the specialist offering `skill_id`
    pub async fn delegate(&self, skill_id: &str, request: &str) -> DelegationOutcome {
        let Some(specialist) = self.specialist_for(skill_id) else {
            return DelegationOutcome::error(format!("no connected specialist offers '{skill_id}'"));
        };

        let params = TaskSendParams::from_text(request);
        info!(
            "Delegating task {} ({}) to {}",
            params.id, skill_id, specialist.card.name
        );

        let task = match self.client.send_task(&specialist.url, &params).await {
            Ok(task) => task,
            Err(e) => {
                warn!("Delegation to {} failed: {}", specialist.url, e);
                return DelegationOutcome::error(format!(
                    "{} could not be reached: {}",
                    specialist.card.name, e
                ));
            }
        };

        match task.state {
            TaskState::Completed => match task.artifact() {
                Some(artifact) => match artifact.first_data() {
                    Some(data) => DelegationOutcome::Success {
                        artifact: artifact.name.clone(),
                        data: data.clone(),
                    },
                    None => DelegationOutcome::error("specialist returned no structured data"),
                },
                None => DelegationOutcome::error("specialist returned no output"),
            },
            state => {
                let reason = task
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "no reason given".to_string());
                DelegationOutcome::error(format!("task {state}: {reason}"))
            }
        }
    }

    /// Resolve an utterance to a skill and delegate it
    pub async fn ask(&self, resolver: &dyn IntentResolver, utterance: &str) -> DelegationOutcome {
        let skills = self.skills();
        match resolver.decide(utterance, &skills).await {
            Some(decision) => self.delegate(&decision.skill_id, &decision.request).await,
            None => DelegationOutcome::error("no connected specialist can handle that request"),
        }
    }
}
