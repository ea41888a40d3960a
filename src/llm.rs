use std::time::Duration;

use anyhow::anyhow;
use rig::{
    agent::Agent,
    client::CompletionClient,
    completion::Prompt,
    providers::openrouter,
};

pub type CompletionAgent = Agent<openrouter::CompletionModel>;

/// Build the shared completion agent. One agent serves all handlers and
/// analyzer tasks; the underlying calls are plain HTTP requests.
pub fn completion_agent(api_key: &str, model: &str) -> CompletionAgent {
    openrouter::Client::new(api_key).agent(model).build()
}

/// One-shot prompt completion, bounded by a timeout so a hung model call
/// cannot stall a worker indefinitely.
pub async fn complete(
    agent: &CompletionAgent,
    prompt: &str,
    timeout: Duration,
) -> anyhow::Result<String> {
    let response = tokio::time::timeout(timeout, agent.prompt(prompt))
        .await
        .map_err(|_| anyhow!("model call timed out after {}s", timeout.as_secs()))?
        .map_err(|e| anyhow!("model call failed: {}", e))?;
    Ok(response)
}
