//! Question answering: one request through the agent loop.

use serde::Serialize;
use uuid::Uuid;

use docent_core::agent::{Agent, AgentError};

use crate::config::Config;
use crate::services::Services;

/// Replacement for an agent reply that came back empty.
pub const EMPTY_REPLY_FALLBACK: &str =
    "Agent Exception: Apologies, I could not determine the best next action, please try again.";

/// A failed request, tagged with the id it was logged under.
#[derive(Debug, thiserror::Error)]
#[error("request {request_id}: {source}")]
pub struct AskError {
    pub request_id: String,
    #[source]
    pub source: AgentError,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub request_id: String,
    pub response: String,
}

/// Answer `request` given prior `history`.
pub async fn answer(
    services: &Services,
    request: &str,
    history: &str,
) -> Result<AskResponse, AskError> {
    let request_id = Uuid::new_v4().to_string();
    let agent = Agent {
        model: services.model.as_ref(),
        catalog: services.store.as_ref(),
        retriever: services.retriever.as_ref(),
        linker: services.linker.as_ref(),
        config: services.config.agent.agent_config(),
    };

    let reply = match agent.run(request, history).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "agent failed");
            return Err(AskError {
                request_id,
                source: e,
            });
        }
    };
    tracing::info!(
        request_id = %request_id,
        outcome = ?reply.outcome,
        iterations = reply.iterations,
        "request finished"
    );

    let response = if reply.text.trim().is_empty() {
        EMPTY_REPLY_FALLBACK.to_string()
    } else {
        reply.text
    };

    Ok(AskResponse {
        request_id,
        response,
    })
}

/// CLI entry point for `docent ask`.
pub async fn run_ask(config: &Config, question: &str, history: &str) -> anyhow::Result<()> {
    let services = Services::connect(config.clone()).await?;
    let result = answer(&services, question, history).await;
    services.store.pool().close().await;

    let response = result?;
    println!("{}", response.response);
    println!();
    println!("request: {}", response.request_id);
    Ok(())
}
