//! OpenAI-compatible chat-completions agent.
//!
//! One `OpenAiCompatAgent` per role: same endpoint, role-specific system
//! prompt (built-in or configured override) and (optionally) model. A missing message body or a refusal comes
//! back as an empty string, which the runner classifies as an empty
//! response. Only transport and HTTP failures are errors.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::agent::{AgentCapability, AgentError, AgentRole, AgentSet};
use crate::config::AgentEndpointConfig;

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

pub struct OpenAiCompatAgent {
    name: String,
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatAgent {
    pub fn new(
        http: reqwest::Client,
        config: &AgentEndpointConfig,
        role: AgentRole,
    ) -> Self {
        let model = config.model_for(role).to_string();
        Self {
            name: format!("{role}:{model}"),
            http,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model,
            system_prompt: config.prompt_for(role).to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn request(&self, task: &str) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: self.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user",
                    content: task.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[async_trait]
impl AgentCapability for OpenAiCompatAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, task: &str) -> Result<String, AgentError> {
        let request = self.request(task);
        let mut builder = self.http.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Http { status, body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Body(e.to_string()))?;

        Ok(message_text(chat, &self.name))
    }
}

fn message_text(chat: ChatResponse, agent: &str) -> String {
    let Some(choice) = chat.choices.into_iter().next() else {
        debug!(agent, "No choices in completion");
        return String::new();
    };
    if let Some(refusal) = choice.message.refusal.filter(|r| !r.is_empty()) {
        debug!(agent, refusal = %refusal, "Model refused task");
        return String::new();
    }
    choice.message.content.unwrap_or_default()
}

impl AgentSet {
    /// One HTTP agent per role against a single OpenAI-compatible endpoint.
    pub fn from_endpoint(config: &AgentEndpointConfig) -> Self {
        let http = reqwest::Client::new();
        let agent = |role| -> Arc<dyn AgentCapability> {
            Arc::new(OpenAiCompatAgent::new(http.clone(), config, role))
        };

        let mut set = AgentSet::empty();
        for role in AgentRole::ALL {
            if role == AgentRole::Supervisor && !config.use_supervisor {
                continue;
            }
            set = set.with_role(role, agent(role));
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> String {
        message_text(serde_json::from_str(json).unwrap(), "test")
    }

    #[test]
    fn test_content_returned() {
        let text = parse(r#"{"choices":[{"message":{"content":"{\"a\":1}"}}]}"#);
        assert_eq!(text, "{\"a\":1}");
    }

    #[test]
    fn test_missing_content_is_empty() {
        assert_eq!(parse(r#"{"choices":[{"message":{"content":null}}]}"#), "");
        assert_eq!(parse(r#"{"choices":[]}"#), "");
        assert_eq!(parse(r#"{}"#), "");
    }

    #[test]
    fn test_refusal_is_empty() {
        let text = parse(
            r#"{"choices":[{"message":{"content":"partial","refusal":"I can't help with that"}}]}"#,
        );
        assert_eq!(text, "");
    }

    #[test]
    fn test_agent_uses_role_model_and_trims_url() {
        let mut config = AgentEndpointConfig {
            base_url: "http://localhost:9000/v1/".into(),
            ..Default::default()
        };
        config
            .role_models
            .insert("tournament".into(), "judge-model".into());

        let agent = OpenAiCompatAgent::new(reqwest::Client::new(), &config, AgentRole::Tournament);
        assert_eq!(agent.url, "http://localhost:9000/v1/chat/completions");
        assert_eq!(agent.model, "judge-model");
        assert_eq!(agent.name(), "tournament:judge-model");
    }

    #[test]
    fn test_role_prompt_override_becomes_system_message() {
        let mut config = AgentEndpointConfig::default();
        config
            .role_prompts
            .insert("review".into(), "You are a harsh methodologist.".into());

        let reviewer = OpenAiCompatAgent::new(reqwest::Client::new(), &config, AgentRole::Review);
        let request = reviewer.request("score H1");
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[0].content, "You are a harsh methodologist.");
        assert_eq!(request.messages[1].content, "score H1");

        let judge = OpenAiCompatAgent::new(reqwest::Client::new(), &config, AgentRole::Tournament);
        let request = judge.request("judge");
        assert_eq!(
            request.messages[0].content,
            crate::prompts::system_prompt(AgentRole::Tournament)
        );
    }

    #[test]
    fn test_from_endpoint_respects_supervisor_toggle() {
        let mut config = AgentEndpointConfig::default();
        assert!(AgentSet::from_endpoint(&config).supervisor().is_some());
        config.use_supervisor = false;
        let set = AgentSet::from_endpoint(&config);
        assert!(set.supervisor().is_none());
        assert!(set.missing_roles().is_empty());
    }
}
