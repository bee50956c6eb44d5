use crate::{Result, chat};

/// Sends an assembled answer prompt as a single user turn.
pub async fn generate(cfg: &ragline_config::LlmProviderConfig, prompt: &str) -> Result<String> {
	chat::complete(cfg, &[chat::message("user", prompt)]).await
}
