// src/enrich.rs
//! Enrichment: provider abstraction + keyword heuristics + batching.
//!
//! `Enricher::enrich_batch` must return exactly one result per input, in order.
//! A provider error or a length mismatch discards the whole batch; other
//! batches of the same run are unaffected.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AiSettings;
use crate::dedup::DedupCandidate;
use crate::error::PipelineError;
use crate::events::delta::DeltaNarrative;
use crate::events::detect::{detect_affected_regulations, detect_event_type};
use crate::events::{EventType, LifecycleState};
use crate::ingest::types::{RawItem, SourceType};

pub const ENV_AI_TEST_MODE: &str = "AI_TEST_MODE";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_HEADLINE_CHARS: usize = 100;
const MAX_SUMMARY_CHARS: usize = 500;
const MAX_PROMPT_CONTENT_CHARS: usize = 4000;

// ------------------------------------------------------------
// Types
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactLevel {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NewsType {
    NewLaw,
    Amendment,
    Enforcement,
    CourtDecision,
    #[default]
    Guidance,
    Proposal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    ConfirmedLaw,
    DraftProposal,
    #[default]
    GuidanceInterpretation,
    MarketPractice,
}

/// What the enricher sees of one raw item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentInput {
    pub title: String,
    pub content: String,
    pub source_type: SourceType,
    /// Regulation tags the connector already attached.
    pub hint_tags: Vec<String>,
}

impl From<&RawItem> for EnrichmentInput {
    fn from(item: &RawItem) -> Self {
        Self {
            title: item.title.clone(),
            content: item.content.clone(),
            source_type: item.source_type.clone(),
            hint_tags: item.regulation_tags.clone(),
        }
    }
}

/// Structured metadata produced for one item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Enrichment {
    pub headline: String,
    pub summary: String,
    pub regulation_tags: Vec<String>,
    pub impact_level: ImpactLevel,
    pub news_type: NewsType,
    pub gs1_impact_tags: Vec<String>,
    pub sector_tags: Vec<String>,
    pub suggested_actions: Vec<String>,
    pub related_standards: Vec<String>,
    pub regulatory_state: Option<LifecycleState>,
    pub is_negative_signal: bool,
    pub negative_signal_keywords: Vec<String>,
    pub confidence_level: ConfidenceLevel,
}

/// A raw item paired with its enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedItem {
    pub raw: RawItem,
    pub enrichment: Enrichment,
}

impl DedupCandidate for EnrichedItem {
    /// Enriched headline, or the raw title when the headline is blank.
    fn title(&self) -> &str {
        if self.enrichment.headline.trim().is_empty() {
            &self.raw.title
        } else {
            &self.enrichment.headline
        }
    }
    fn url(&self) -> &str {
        &self.raw.url
    }
    fn source_name(&self) -> &str {
        &self.raw.source_name
    }
    fn source_type(&self) -> &SourceType {
        &self.raw.source_type
    }
    fn regulation_tags(&self) -> &[String] {
        &self.enrichment.regulation_tags
    }
}

/// Input for narrating one detected regulatory event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    pub event_type: EventType,
    pub primary_regulation: String,
    pub title: String,
    pub text: String,
}

pub trait Enricher: Send + Sync {
    /// One enrichment per input, same order.
    fn enrich_batch<'a>(
        &'a self,
        inputs: &'a [EnrichmentInput],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Enrichment>>> + Send + 'a>>;

    /// Delta narrative for an event; `None` lets the caller fall back to a template.
    fn narrate_event<'a>(
        &'a self,
        ctx: &'a EventContext,
    ) -> Pin<Box<dyn Future<Output = Option<DeltaNarrative>> + Send + 'a>>;

    fn name(&self) -> &'static str;
}

pub type DynEnricher = Arc<dyn Enricher>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Keyword,
    OpenAi,
    Unsupported,
}

fn backend_for(settings: &AiSettings, mock: bool) -> Backend {
    if mock || !settings.enabled {
        return Backend::Keyword;
    }
    let provider = settings.provider.as_deref().map(|p| p.trim().to_ascii_lowercase());
    match provider.as_deref() {
        Some("keyword") => Backend::Keyword,
        Some("openai") => Backend::OpenAi,
        _ => Backend::Unsupported,
    }
}

/// Factory: build an enricher according to config and environment variables.
///
/// * `AI_TEST_MODE=mock`, `enabled = false` or `provider = "keyword"` → `KeywordEnricher`.
/// * `provider = "openai"` with an API key → `OpenAiEnricher`.
/// * Anything else falls back to `KeywordEnricher` with a warning.
pub fn build_enricher_from_config(settings: &AiSettings) -> DynEnricher {
    let mock = std::env::var(ENV_AI_TEST_MODE)
        .map(|v| v.eq_ignore_ascii_case("mock"))
        .unwrap_or(false);

    match backend_for(settings, mock) {
        Backend::Keyword => Arc::new(KeywordEnricher),
        Backend::OpenAi => {
            let key = std::env::var(ENV_OPENAI_API_KEY).unwrap_or_default();
            match OpenAiEnricher::new(key, settings.model.as_deref()) {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!(error = %e, "openai enricher unavailable; using keyword heuristics");
                    Arc::new(KeywordEnricher)
                }
            }
        }
        Backend::Unsupported => {
            warn!(provider = ?settings.provider, "unsupported AI provider; using keyword heuristics");
            Arc::new(KeywordEnricher)
        }
    }
}

// ------------------------------------------------------------
// Batching
// ------------------------------------------------------------

/// Outcome of one failed batch.
#[derive(Debug)]
pub struct BatchFailure {
    pub items: Vec<RawItem>,
    pub error: PipelineError,
}

#[derive(Debug, Default)]
pub struct EnrichmentRun {
    pub enriched: Vec<EnrichedItem>,
    pub failures: Vec<BatchFailure>,
    pub batches: usize,
}

/// Enrich `items` in chunks of `batch_size` (0 is treated as 1).
pub async fn enrich_in_batches(
    enricher: &dyn Enricher,
    items: Vec<RawItem>,
    batch_size: usize,
) -> EnrichmentRun {
    let size = batch_size.max(1);
    let mut run = EnrichmentRun::default();
    let mut pending = items.into_iter().peekable();
    let mut batch_no = 0usize;

    while pending.peek().is_some() {
        let chunk: Vec<RawItem> = pending.by_ref().take(size).collect();
        batch_no += 1;
        run.batches += 1;
        let inputs: Vec<EnrichmentInput> = chunk.iter().map(EnrichmentInput::from).collect();

        let result = enricher.enrich_batch(&inputs).await.and_then(|out| {
            if out.len() == inputs.len() {
                Ok(out)
            } else {
                Err(anyhow!(
                    "expected {} enrichments, got {}",
                    inputs.len(),
                    out.len()
                ))
            }
        });

        match result {
            Ok(out) => {
                counter!("ai_items_enriched_total").increment(out.len() as u64);
                run.enriched.extend(
                    chunk
                        .into_iter()
                        .zip(out)
                        .map(|(raw, enrichment)| EnrichedItem { raw, enrichment }),
                );
            }
            Err(e) => {
                warn!(batch = batch_no, size = chunk.len(), error = %e, "AI batch failed; dropping batch");
                counter!("ai_batch_failures_total").increment(1);
                run.failures.push(BatchFailure {
                    error: PipelineError::AiBatch {
                        batch: batch_no,
                        size: chunk.len(),
                        message: format!("{e:#}"),
                    },
                    items: chunk,
                });
            }
        }
    }

    info!(
        batches = run.batches,
        enriched = run.enriched.len(),
        failed_batches = run.failures.len(),
        provider = enricher.name(),
        "enrichment complete"
    );
    run
}

// ------------------------------------------------------------
// Keyword heuristics
// ------------------------------------------------------------

const NEGATIVE_SIGNAL_KEYWORDS: &[&str] = &[
    "postpone",
    "postponed",
    "postponement",
    "delay",
    "delayed",
    "deferred",
    "pushed back",
    "exemption",
    "exempt",
    "carve-out",
    "waiver",
    "derogation",
    "simplification",
    "omnibus",
    "less burdensome",
    "raised threshold",
    "reduced scope",
    "fewer companies",
    "voluntary",
    "phased in",
    "transitional period",
    "withdrawn",
    "scrapped",
];

const CONFIRMED_LAW_KEYWORDS: &[&str] = &[
    "official journal",
    "entered into force",
    "legally binding",
    "mandatory",
    "regulation",
    "directive",
    "adopted text",
    "final text",
];

const DRAFT_PROPOSAL_KEYWORDS: &[&str] = &[
    "proposal",
    "draft",
    "proposed",
    "under negotiation",
    "trilogue",
    "first reading",
    "not yet adopted",
];

const GUIDANCE_KEYWORDS: &[&str] = &[
    "guidance",
    "guidelines",
    "faq",
    "q&a",
    "interpretation",
    "clarification",
    "best practice",
];

const GS1_STANDARDS: &[&str] = &["GTIN", "GLN", "SSCC", "EPCIS", "GDSN", "DIGITAL LINK"];

const SECTOR_KEYWORDS: &[(&str, &str)] = &[
    ("retail", "RETAIL"),
    ("healthcare", "HEALTHCARE"),
    ("food", "FOOD"),
    ("logistics", "LOGISTICS"),
    ("construction", "CONSTRUCTION"),
    ("textile", "TEXTILES"),
    ("electronic", "ELECTRONICS"),
    ("automotive", "AUTOMOTIVE"),
    ("chemical", "CHEMICALS"),
    ("packaging", "PACKAGING"),
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>().trim_end().to_string()
    }
}

/// Up to three leading sentences of `content` (stops once 120 chars are
/// collected); the title when there is no content.
fn extract_summary(title: &str, content: &str) -> String {
    let mut out = String::new();
    let mut sentences = 0;
    for sentence in content.split_inclusive(['.', '!', '?']) {
        let s = sentence.trim();
        if s.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(s);
        sentences += 1;
        if sentences >= 3 || out.chars().count() >= 120 {
            break;
        }
    }
    if out.is_empty() {
        out = title.trim().to_string();
    }
    truncate_chars(&out, MAX_SUMMARY_CHARS)
}

fn detect_confidence(lower: &str, source_type: &SourceType) -> ConfidenceLevel {
    if contains_any(lower, CONFIRMED_LAW_KEYWORDS) {
        return ConfidenceLevel::ConfirmedLaw;
    }
    if contains_any(lower, DRAFT_PROPOSAL_KEYWORDS) {
        return ConfidenceLevel::DraftProposal;
    }
    if *source_type == SourceType::EuOfficial || contains_any(lower, GUIDANCE_KEYWORDS) {
        return ConfidenceLevel::GuidanceInterpretation;
    }
    ConfidenceLevel::MarketPractice
}

/// Deterministic keyword enrichment. Used for `AI_TEST_MODE=mock`, when AI is
/// disabled, and as the fallback when no remote provider can be built.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordEnricher;

impl KeywordEnricher {
    pub fn enrich_one(&self, input: &EnrichmentInput) -> Enrichment {
        let text = format!("{} {}", input.title, input.content);
        let lower = text.to_lowercase();
        let upper = text.to_uppercase();

        let regulation_tags = detect_affected_regulations(&text, &input.hint_tags);

        let impact_level = if contains_any(&lower, &["mandatory", "deadline", "enforcement", "penalt"]) {
            ImpactLevel::High
        } else if contains_any(&lower, &["proposal", "draft", "consultation"]) {
            ImpactLevel::Low
        } else {
            ImpactLevel::Medium
        };

        let news_type = if contains_any(&lower, &["adopted", "published in the official journal"]) {
            NewsType::NewLaw
        } else if lower.contains("amendment") {
            NewsType::Amendment
        } else if lower.contains("enforcement") {
            NewsType::Enforcement
        } else if contains_any(&lower, &["court", "ruling", "judgment"]) {
            NewsType::CourtDecision
        } else if lower.contains("proposal") {
            NewsType::Proposal
        } else {
            NewsType::Guidance
        };

        let gs1_impact_tags: &[&str] = if contains_any(&lower, &["dpp", "digital product passport"]) {
            &["DPP", "IDENTIFICATION", "PRODUCT_MASTER_DATA"]
        } else if contains_any(&lower, &["traceability", "supply chain", "due diligence"]) {
            &["TRACEABILITY", "DUE_DILIGENCE"]
        } else if lower.contains("packaging") {
            &["PACKAGING_ATTRIBUTES", "CIRCULAR_ECONOMY"]
        } else if contains_any(&lower, &["reporting", "disclosure"]) {
            &["ESG_REPORTING"]
        } else {
            &[]
        };

        let sector_tags: Vec<String> = SECTOR_KEYWORDS
            .iter()
            .filter(|(k, _)| lower.contains(k))
            .map(|(_, tag)| tag.to_string())
            .collect();

        let suggested_actions = match regulation_tags.first() {
            Some(reg) => vec![
                format!("Review the {reg} requirements that apply to your products and reporting"),
                "Assess current GS1 master data for the attributes this change requires".to_string(),
                "Contact GS1 Netherlands for implementation guidance".to_string(),
            ],
            None => Vec::new(),
        };

        let related_standards: Vec<String> = GS1_STANDARDS
            .iter()
            .filter(|s| upper.contains(*s))
            .map(|s| s.to_string())
            .collect();

        let negative_signal_keywords: Vec<String> = NEGATIVE_SIGNAL_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .map(|k| k.to_string())
            .collect();

        Enrichment {
            headline: truncate_chars(input.title.trim(), MAX_HEADLINE_CHARS),
            summary: extract_summary(&input.title, &input.content),
            regulation_tags,
            impact_level,
            news_type,
            gs1_impact_tags: gs1_impact_tags.iter().map(|t| t.to_string()).collect(),
            sector_tags,
            suggested_actions,
            related_standards,
            regulatory_state: Some(
                detect_event_type(&lower)
                    .map(|t| t.lifecycle_state())
                    .unwrap_or(LifecycleState::Adopted),
            ),
            is_negative_signal: !negative_signal_keywords.is_empty(),
            negative_signal_keywords,
            confidence_level: detect_confidence(&lower, &input.source_type),
        }
    }
}

impl Enricher for KeywordEnricher {
    fn enrich_batch<'a>(
        &'a self,
        inputs: &'a [EnrichmentInput],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Enrichment>>> + Send + 'a>> {
        let out: Vec<Enrichment> = inputs.iter().map(|i| self.enrich_one(i)).collect();
        Box::pin(async move { Ok(out) })
    }

    fn narrate_event<'a>(
        &'a self,
        _ctx: &'a EventContext,
    ) -> Pin<Box<dyn Future<Output = Option<DeltaNarrative>> + Send + 'a>> {
        Box::pin(async { None })
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

// ------------------------------------------------------------
// OpenAI
// ------------------------------------------------------------

/// OpenAI chat-completions enricher. Requires an API key.
pub struct OpenAiEnricher {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiEnricher {
    /// `model_override`: defaults to gpt-4o-mini.
    pub fn new(api_key: String, model_override: Option<&str>) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("missing {ENV_OPENAI_API_KEY}");
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("regwatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_key,
            model: model_override.unwrap_or(DEFAULT_OPENAI_MODEL).to_string(),
        })
    }

    /// One chat call with a JSON-object response; returns the message content.
    async fn chat_json(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
            max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        counter!("ai_calls_total").increment(1);
        let resp = self
            .http
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("sending chat completion request")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("chat completion returned HTTP {status}");
        }
        let body: Resp = resp.json().await.context("decoding chat completion")?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("empty chat completion"))
    }

    async fn enrich_batch_impl(&self, inputs: &[EnrichmentInput]) -> Result<Vec<Enrichment>> {
        #[derive(Serialize)]
        struct Article<'a> {
            index: usize,
            title: &'a str,
            content: String,
            source_type: &'a str,
        }
        #[derive(Deserialize)]
        struct BatchResp {
            items: Vec<Enrichment>,
        }

        let articles: Vec<Article> = inputs
            .iter()
            .enumerate()
            .map(|(index, i)| Article {
                index,
                title: &i.title,
                content: truncate_chars(&i.content, MAX_PROMPT_CONTENT_CHARS),
                source_type: i.source_type.as_str(),
            })
            .collect();
        let user = serde_json::to_string(&articles).context("encoding batch")?;
        let system = "You are an ESG regulatory intelligence analyst for GS1 Netherlands members. \
For every article in the input array return one object, in the same order, inside {\"items\": [...]}. \
Fields: headline (max 100 chars), summary (2-3 sentences), regulation_tags (codes such as CSRD, ESRS, EUDR, PPWR, ESPR, DPP, CSDDD), \
impact_level (LOW|MEDIUM|HIGH), news_type (NEW_LAW|AMENDMENT|ENFORCEMENT|COURT_DECISION|GUIDANCE|PROPOSAL), \
gs1_impact_tags, sector_tags, suggested_actions (2-4 steps), related_standards (GTIN, GLN, SSCC, EPCIS, GDSN, DIGITAL LINK), \
regulatory_state (PROPOSAL|POLITICAL_AGREEMENT|ADOPTED|DELEGATED_ACT_DRAFT|DELEGATED_ACT_ADOPTED|GUIDANCE|ENFORCEMENT_SIGNAL|POSTPONED_OR_SOFTENED), \
is_negative_signal, negative_signal_keywords, confidence_level (CONFIRMED_LAW|DRAFT_PROPOSAL|GUIDANCE_INTERPRETATION|MARKET_PRACTICE). \
If an article has no regulatory relevance, use an empty regulation_tags list and the summary \"No relevant regulatory content\".";

        let content = self.chat_json(system, &user, 600 * inputs.len() as u32).await?;
        let parsed: BatchResp =
            serde_json::from_str(&content).context("parsing enrichment batch JSON")?;
        Ok(parsed.items)
    }

    async fn narrate_impl(&self, ctx: &EventContext) -> Result<DeltaNarrative> {
        let system = "You extract decision-grade delta analysis from regulatory news. \
Return a JSON object with the string fields previous_assumption, new_information, what_changed, \
what_did_not_change and decision_impact. Each field needs at least two substantive sentences. \
Never use placeholders such as TBD, N/A, unknown or pending.";
        let user = format!(
            "Event type: {}\nPrimary regulation: {}\nTitle: {}\n\n{}",
            ctx.event_type,
            ctx.primary_regulation,
            ctx.title,
            truncate_chars(&ctx.text, MAX_PROMPT_CONTENT_CHARS)
        );
        let content = self.chat_json(system, &user, 700).await?;
        serde_json::from_str(&content).context("parsing delta narrative JSON")
    }
}

impl Enricher for OpenAiEnricher {
    fn enrich_batch<'a>(
        &'a self,
        inputs: &'a [EnrichmentInput],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Enrichment>>> + Send + 'a>> {
        Box::pin(self.enrich_batch_impl(inputs))
    }

    fn narrate_event<'a>(
        &'a self,
        ctx: &'a EventContext,
    ) -> Pin<Box<dyn Future<Output = Option<DeltaNarrative>> + Send + 'a>> {
        Box::pin(async move {
            match self.narrate_impl(ctx).await {
                Ok(n) => Some(n),
                Err(e) => {
                    warn!(regulation = %ctx.primary_regulation, error = %e, "event narration failed");
                    None
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai(enabled: bool, provider: Option<&str>) -> AiSettings {
        AiSettings {
            enabled,
            provider: provider.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn backend_selection() {
        assert_eq!(backend_for(&ai(true, Some("keyword")), false), Backend::Keyword);
        assert_eq!(backend_for(&ai(true, Some(" Keyword ")), false), Backend::Keyword);
        assert_eq!(backend_for(&ai(true, Some("openai")), false), Backend::OpenAi);
        assert_eq!(backend_for(&ai(true, Some("openai")), true), Backend::Keyword);
        assert_eq!(backend_for(&ai(false, Some("openai")), false), Backend::Keyword);
        assert_eq!(backend_for(&ai(true, Some("claude")), false), Backend::Unsupported);
        assert_eq!(backend_for(&ai(true, None), false), Backend::Unsupported);
        assert_eq!(build_enricher_from_config(&ai(true, Some("keyword"))).name(), "keyword");
    }

    fn input(title: &str, content: &str) -> EnrichmentInput {
        EnrichmentInput {
            title: title.into(),
            content: content.into(),
            source_type: SourceType::EuOfficial,
            hint_tags: vec![],
        }
    }

    #[test]
    fn keyword_enricher_tags_and_summary() {
        let e = KeywordEnricher.enrich_one(&input(
            "Council formally adopts PPWR",
            "The packaging regulation was adopted today. Retail packaging must carry GTIN data. Deadlines follow.",
        ));
        assert_eq!(e.regulation_tags, vec!["PPWR"]);
        assert_eq!(e.news_type, NewsType::NewLaw);
        assert!(e.sector_tags.contains(&"RETAIL".to_string()));
        assert!(e.sector_tags.contains(&"PACKAGING".to_string()));
        assert_eq!(e.related_standards, vec!["GTIN"]);
        assert_eq!(e.confidence_level, ConfidenceLevel::ConfirmedLaw);
        assert_eq!(e.regulatory_state, Some(LifecycleState::Adopted));
        assert!(e.summary.starts_with("The packaging regulation was adopted today."));
        assert_eq!(e.suggested_actions.len(), 3);
    }

    #[test]
    fn summary_falls_back_to_title() {
        assert_eq!(extract_summary("Only a title", "   "), "Only a title");
    }

    #[test]
    fn negative_signals_detected() {
        let e = KeywordEnricher.enrich_one(&input(
            "CSRD wave two postponed",
            "The omnibus package delays reporting.",
        ));
        assert!(e.is_negative_signal);
        assert!(e.negative_signal_keywords.contains(&"postponed".to_string()));
        assert!(e.negative_signal_keywords.contains(&"omnibus".to_string()));
    }

    #[test]
    fn openai_requires_key() {
        assert!(OpenAiEnricher::new(String::new(), None).is_err());
    }
}
