//! Decoding of chunk payloads stored next to the dense and BM25 vectors.

use std::collections::HashMap;

use qdrant_client::qdrant::{
	PointId, ScoredPoint, Value, point_id::PointIdOptions, value::Kind,
};
use time::{Date, OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};

use ragline_domain::{ChunkMetadata, IndexHit};

pub const CHUNK_ID: &str = "chunk_id";
pub const DOCUMENT_ID: &str = "document_id";
pub const TEXT: &str = "text";
/// Department and region values are written lowercase at ingestion; filters match them
/// exactly.
pub const DEPARTMENT: &str = "department";
pub const REGION: &str = "region";
pub const EFFECTIVE_DATE: &str = "effective_date";
pub const ACL_GROUPS: &str = "acl_groups";
pub const PAGE: &str = "page";
pub const SECTION: &str = "section";
pub const DOCUMENT_FAMILY: &str = "document_family";

/// Builds an [`IndexHit`] from a scored point. Points without a document id or text are
/// skipped by returning `None`.
pub fn hit_from_point(point: &ScoredPoint) -> Option<IndexHit> {
	let payload = &point.payload;
	let chunk_id = payload_string(payload, CHUNK_ID)
		.or_else(|| point.id.as_ref().and_then(point_id_string))?;
	let document_id = payload_string(payload, DOCUMENT_ID)?;
	let text = payload_string(payload, TEXT)?;

	Some(IndexHit { chunk_id, document_id, text, score: point.score, metadata: metadata(payload) })
}

pub fn metadata(payload: &HashMap<String, Value>) -> ChunkMetadata {
	ChunkMetadata {
		department: payload_string(payload, DEPARTMENT),
		region: payload_string(payload, REGION),
		effective_date: payload_date(payload, EFFECTIVE_DATE),
		acl_groups: payload_strings(payload, ACL_GROUPS),
		page: payload_u32(payload, PAGE),
		section: payload_string(payload, SECTION),
		document_family: payload_string(payload, DOCUMENT_FAMILY),
	}
}

pub fn point_id_string(point_id: &PointId) -> Option<String> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Some(id.clone()),
		Some(PointIdOptions::Num(id)) => Some(id.to_string()),
		None => None,
	}
}

pub fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(text)) if !text.trim().is_empty() => Some(text.to_string()),
		_ => None,
	}
}

/// String list values. A single string is read as a one-element list.
pub fn payload_strings(payload: &HashMap<String, Value>, key: &str) -> Vec<String> {
	let Some(value) = payload.get(key) else { return Vec::new() };

	match &value.kind {
		Some(Kind::ListValue(list)) => list
			.values
			.iter()
			.filter_map(|item| match &item.kind {
				Some(Kind::StringValue(text)) => Some(text.to_string()),
				_ => None,
			})
			.collect(),
		Some(Kind::StringValue(text)) => vec![text.to_string()],
		_ => Vec::new(),
	}
}

pub fn payload_u32(payload: &HashMap<String, Value>, key: &str) -> Option<u32> {
	match &payload.get(key)?.kind {
		Some(Kind::IntegerValue(value)) => u32::try_from(*value).ok(),
		Some(Kind::DoubleValue(value)) if value.fract() == 0.0 && *value >= 0.0 =>
			u32::try_from(*value as i64).ok(),
		_ => None,
	}
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn payload_date(payload: &HashMap<String, Value>, key: &str) -> Option<Date> {
	let text = payload_string(payload, key)?;

	Date::parse(text.as_str(), format_description!("[year]-[month]-[day]"))
		.ok()
		.or_else(|| OffsetDateTime::parse(text.as_str(), &Rfc3339).ok().map(|ts| ts.date()))
}
