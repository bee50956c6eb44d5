use std::sync::Arc;

use ragline_service::RaglineService;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<RaglineService>,
}
impl AppState {
	pub fn new(config: ragline_config::Config) -> color_eyre::Result<Self> {
		let service = RaglineService::from_config(config)?;

		Ok(Self::from_service(service))
	}

	pub fn from_service(service: RaglineService) -> Self {
		Self { service: Arc::new(service) }
	}
}
