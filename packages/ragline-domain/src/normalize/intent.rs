use crate::query::Intent;

const DOMAIN_TERMS: &[&str] = &[
	"policy",
	"policies",
	"benefit",
	"benefits",
	"leave",
	"vacation",
	"pto",
	"payroll",
	"salary",
	"expense",
	"expenses",
	"reimbursement",
	"travel",
	"handbook",
	"procedure",
	"process",
	"compliance",
	"contract",
	"employee",
	"employees",
	"manager",
	"onboarding",
	"holiday",
	"holidays",
	"insurance",
	"pension",
	"security",
	"remote",
	"office",
	"training",
	"invoice",
	"approval",
];
const OFF_TOPIC_MARKERS: &[&str] = &[
	"weather",
	"joke",
	"recipe",
	"sports score",
	"football",
	"movie",
	"lottery",
	"horoscope",
	"song",
	"celebrity",
	"stock price",
];
const GREETINGS: &[&str] = &[
	"hi",
	"hello",
	"hey",
	"thanks",
	"thank you",
	"good morning",
	"good afternoon",
	"good evening",
	"bye",
	"goodbye",
];
const COMPARATIVE_MARKERS: &[&str] =
	&["compare", "comparison", "difference between", "differ", "versus", "vs", "changed"];
const PROCEDURAL_MARKERS: &[&str] =
	&["how do i", "how to", "how can i", "steps", "process for", "apply for", "submit", "request a"];
const ANALYTICAL_MARKERS: &[&str] =
	&["why", "impact", "analyze", "analyse", "trend", "implications", "explain"];
const QUESTION_WORDS: &[&str] =
	&["what", "when", "who", "where", "which", "is", "are", "does", "do", "can", "how many"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
	pub intent: Intent,
	pub confidence: f32,
}
impl Classification {
	pub fn new(intent: Intent, confidence: f32) -> Self {
		Self { intent, confidence: confidence.clamp(0.0, 1.0) }
	}
}

pub trait IntentClassifier
where
	Self: Send + Sync,
{
	fn classify(&self, text: &str) -> Classification;
}

/// Marker-phrase classifier over lowercase text. The first matching rule wins.
#[derive(Clone, Debug, Default)]
pub struct RuleIntentClassifier;
impl IntentClassifier for RuleIntentClassifier {
	fn classify(&self, text: &str) -> Classification {
		let padded = pad_words(text);
		let domain_hits = DOMAIN_TERMS.iter().filter(|term| has_phrase(&padded, term)).count();

		if OFF_TOPIC_MARKERS.iter().any(|marker| has_phrase(&padded, marker)) {
			match domain_hits {
				0 => return Classification::new(Intent::OffTopic, 0.95),
				1 => return Classification::new(Intent::OffTopic, 0.6),
				_ => {},
			}
		}

		let words = padded.split_whitespace().count();

		if domain_hits == 0
			&& words <= 4
			&& GREETINGS.iter().any(|greeting| has_phrase(&padded, greeting))
		{
			return Classification::new(Intent::Conversational, 0.9);
		}
		if COMPARATIVE_MARKERS.iter().any(|marker| has_phrase(&padded, marker)) {
			return Classification::new(Intent::Comparative, 0.85);
		}
		if PROCEDURAL_MARKERS.iter().any(|marker| has_phrase(&padded, marker)) {
			return Classification::new(Intent::Procedural, 0.8);
		}
		if ANALYTICAL_MARKERS.iter().any(|marker| has_phrase(&padded, marker)) {
			return Classification::new(Intent::Analytical, 0.75);
		}
		if QUESTION_WORDS.iter().any(|word| padded.starts_with(format!(" {word} ").as_str())) {
			return Classification::new(Intent::Factual, 0.7);
		}

		Classification::new(Intent::Factual, 0.5)
	}
}

fn pad_words(text: &str) -> String {
	let mut out = String::with_capacity(text.len() + 2);

	out.push(' ');

	for word in text.split(|ch: char| !ch.is_alphanumeric()).filter(|word| !word.is_empty()) {
		out.push_str(&word.to_lowercase());
		out.push(' ');
	}

	out
}

fn has_phrase(padded: &str, phrase: &str) -> bool {
	padded.contains(format!(" {phrase} ").as_str())
}
