use ragline_domain::ScopeViolation;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid scope: {message}")]
	InvalidScope { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Retrieval unavailable: {message}")]
	RetrievalUnavailable { message: String },
	#[error("Service unavailable: {message}")]
	ServiceUnavailable { message: String },
	#[error("Request exceeded its {deadline_ms} ms deadline.")]
	Timeout { deadline_ms: u64 },
	#[error("Generation failed: {message}")]
	GenerationFailed { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl Error {
	/// Whether a local retry of the same call may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Provider { .. } | Self::Storage { .. } | Self::ServiceUnavailable { .. })
	}
}

impl From<ScopeViolation> for Error {
	fn from(err: ScopeViolation) -> Self {
		Self::InvalidScope { message: err.to_string() }
	}
}

impl From<ragline_providers::Error> for Error {
	fn from(err: ragline_providers::Error) -> Self {
		match err {
			ragline_providers::Error::InvalidConfig { message } => Self::InvalidRequest { message },
			other => Self::Provider { message: other.to_string() },
		}
	}
}

impl From<ragline_storage::Error> for Error {
	fn from(err: ragline_storage::Error) -> Self {
		match err {
			ragline_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			ragline_storage::Error::Qdrant(inner) => Self::Storage { message: inner.to_string() },
		}
	}
}
