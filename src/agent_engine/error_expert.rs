use crate::agent_engine::prompts;
use crate::errors::BarryResult;
use crate::llm::conversation::RoleClient;
use crate::llm::protocol;
use crate::llm::types::ContentPart;
use crate::perception::types::PerceptionSnapshot;

/// Fourth expert: a stateless second opinion on major failures.
pub struct ErrorCoordinator {
    client: RoleClient,
}

impl ErrorCoordinator {
    pub fn new(client: RoleClient) -> Self {
        Self { client }
    }

    pub async fn advise(
        &self,
        task: &str,
        subtask: &str,
        diagnosis: &str,
        snapshot: &PerceptionSnapshot,
    ) -> BarryResult<String> {
        let prompt = prompts::error_advice(task, subtask, diagnosis, &snapshot.describe_regions());
        let reply = self
            .client
            .ask_once(
                Some(prompts::ERROR_SYSTEM.to_string()),
                vec![ContentPart::text(prompt), ContentPart::image(snapshot.raw_data_url())],
            )
            .await?;
        let advice = protocol::extract_response(&reply).unwrap_or(reply).trim().to_string();
        tracing::info!(advice = %advice, "error expert advice");
        Ok(advice)
    }
}
