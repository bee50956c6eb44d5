use serde_json::Value;

use crate::{Error, Result};

/// One OpenAI-compatible chat completion. Returns the first choice's message content.
pub async fn complete(cfg: &ragline_config::LlmProviderConfig, messages: &[Value]) -> Result<String> {
	let client = crate::http_client(cfg.timeout_ms)?;
	let body = serde_json::json!({
		"model": cfg.model,
		"temperature": cfg.temperature,
		"messages": messages,
	});
	let res = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_chat_content(&json)
}

pub fn message(role: &str, content: &str) -> Value {
	serde_json::json!({ "role": role, "content": content })
}

fn parse_chat_content(json: &Value) -> Result<String> {
	json.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|choices| choices.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|message| message.get("content"))
		.and_then(|content| content.as_str())
		.map(str::to_string)
		.ok_or_else(|| Error::response("chat completion is missing choices[0].message.content"))
}
