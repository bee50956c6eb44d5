use serde_json::Value;

use crate::{Error, Result};

/// Scores `docs` against `query` with a Cohere/Jina-style rerank endpoint.
///
/// Scores come back aligned with `docs`. Documents the provider leaves out score zero.
pub async fn rerank(
	cfg: &ragline_config::ProviderConfig,
	query: &str,
	docs: &[String],
) -> Result<Vec<f32>> {
	if docs.is_empty() {
		return Ok(Vec::new());
	}

	let client = crate::http_client(cfg.timeout_ms)?;
	let body = serde_json::json!({
		"model": cfg.model,
		"query": query,
		"documents": docs,
		"top_n": docs.len(),
	});
	let res = client
		.post(crate::endpoint(&cfg.api_base, &cfg.path))
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;

	parse_rerank_response(json, docs.len())
}

fn parse_rerank_response(json: Value, doc_count: usize) -> Result<Vec<f32>> {
	let results = json
		.get("results")
		.or_else(|| json.get("data"))
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::response("rerank response is missing the results array"))?;
	let mut scores = vec![0.0_f32; doc_count];

	for item in results {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.ok_or_else(|| Error::response("rerank result is missing its index"))? as usize;
		let score = item
			.get("relevance_score")
			.or_else(|| item.get("score"))
			.and_then(|v| v.as_f64())
			.ok_or_else(|| Error::response("rerank result is missing its score"))? as f32;

		if let Some(slot) = scores.get_mut(index) {
			*slot = score;
		}
	}

	Ok(scores)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn aligns_scores_with_documents() {
		let json = serde_json::json!({
			"results": [
				{ "index": 2, "relevance_score": 0.4 },
				{ "index": 0, "relevance_score": 0.9 },
				{ "index": 7, "relevance_score": 0.8 }
			]
		});
		let scores = parse_rerank_response(json, 3).expect("Failed to parse rerank scores.");

		assert_eq!(scores, vec![0.9, 0.0, 0.4]);
	}

	#[test]
	fn accepts_data_and_score_aliases() {
		let json = serde_json::json!({ "data": [{ "index": 0, "score": 0.5 }] });

		assert_eq!(parse_rerank_response(json, 1).expect("Failed to parse rerank scores."), vec![
			0.5
		]);
	}
}
