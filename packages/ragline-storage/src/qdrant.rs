pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

use qdrant_client::qdrant::{
	Condition, Document, Filter, Query, QueryPointsBuilder, ScoredPoint,
};

use ragline_domain::{IndexHit, QueryFilters};

use crate::{Error, Result, payload};

/// Chunk index backed by one Qdrant collection with named `dense` and `bm25` vectors.
pub struct QdrantIndex {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantIndex {
	pub fn new(cfg: &ragline_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	pub async fn search_vectors(
		&self,
		vector: &[f32],
		filters: &QueryFilters,
		top_k: u32,
	) -> Result<Vec<IndexHit>> {
		if vector.len() != self.vector_dim as usize {
			return Err(Error::InvalidArgument(format!(
				"query vector has {} dimensions, collection expects {}",
				vector.len(),
				self.vector_dim
			)));
		}

		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector.to_vec()))
			.using(DENSE_VECTOR_NAME)
			.filter(build_filter(filters)?)
			.limit(top_k as u64)
			.with_payload(true);
		let response = self.client.query(search).await?;

		Ok(collect_hits(&response.result))
	}

	pub async fn search_keywords(
		&self,
		text: &str,
		filters: &QueryFilters,
		top_k: u32,
	) -> Result<Vec<IndexHit>> {
		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(Document::new(text.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.filter(build_filter(filters)?)
			.limit(top_k as u64)
			.with_payload(true);
		let response = self.client.query(search).await?;

		Ok(collect_hits(&response.result))
	}
}

/// Payload filter shared by both searches. ACL groups are mandatory: a filter without any
/// group would read every tenant's chunks, so it is refused.
///
/// Date ranges are not pushed down; chunks without an effective date must still match and
/// the caller re-checks dates locally.
pub fn build_filter(filters: &QueryFilters) -> Result<Filter> {
	if filters.acl_groups.is_empty() {
		return Err(Error::InvalidArgument("acl_groups must not be empty".to_string()));
	}

	let mut must = vec![Condition::matches(payload::ACL_GROUPS, filters.acl_groups.clone())];

	if let Some(department) = filters.department.as_ref() {
		must.push(Condition::matches(payload::DEPARTMENT, department.clone()));
	}
	if let Some(region) = filters.region.as_ref() {
		must.push(Condition::matches(payload::REGION, region.clone()));
	}

	Ok(Filter::must(must))
}

fn collect_hits(points: &[ScoredPoint]) -> Vec<IndexHit> {
	let mut out = Vec::with_capacity(points.len());

	for point in points {
		match payload::hit_from_point(point) {
			Some(hit) => out.push(hit),
			None => tracing::warn!(point_id = ?point.id, "Skipping point with incomplete payload."),
		}
	}

	out
}
