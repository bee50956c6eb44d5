use crate::{Result, chat};

const SUMMARIZE_INSTRUCTION: &str = "Compress the passage. Keep facts, numbers, dates, and names \
exactly as written. Do not add information. Reply with the compressed passage only.";

pub async fn summarize(
	cfg: &ragline_config::LlmProviderConfig,
	text: &str,
	target_tokens: u32,
) -> Result<String> {
	let messages = [
		chat::message("system", SUMMARIZE_INSTRUCTION),
		chat::message("user", &summary_request(text, target_tokens)),
	];

	chat::complete(cfg, &messages).await.map(|summary| summary.trim().to_string())
}

fn summary_request(text: &str, target_tokens: u32) -> String {
	format!("Target length: at most {target_tokens} tokens.\n\nPassage:\n{text}")
}
