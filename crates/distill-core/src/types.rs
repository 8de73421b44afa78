use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use time::macros::format_description;
use time::Date;

use crate::frontmatter::{self, Document};

/// Version stamped into every analyzed artifact.
pub const PIPELINE_VERSION: &str = "1.0";

// ── Errors ──

/// A tag produced outside its closed set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {field} `{value}`")]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

/// Why a metadata block could not be turned into a [`RecordMeta`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetaError {
    #[error("missing required key `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{key}`: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Classification of a failed external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, outages, rate limits: worth retrying.
    Transient,
    /// Bad requests or malformed output: retrying cannot help.
    Permanent,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Transient
    }
}

// ── Closed tag sets ──

/// Lowercase, trim and fold `-`/space into `_` so `Key Point` and `key-point` agree.
fn normalize_tag(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect()
}

macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident => $s:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match normalize_tag(s).as_str() {
                    $($s => Ok($name::$variant),)+
                    _ => Err(UnknownVariant {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

closed_enum!(
    /// What kind of content a transcript carries.
    ContentType, "content_type" {
        TechnicalAnalysis => "technical_analysis",
        OpinionDiscussion => "opinion_discussion",
        News => "news",
        Educational => "educational",
        Interview => "interview",
        Narrative => "narrative",
    }
);

closed_enum!(
    ContentDensity, "content_density" {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
);

closed_enum!(
    /// How quickly the content goes stale.
    TemporalRelevance, "temporal_relevance" {
        Evergreen => "evergreen",
        TimeSensitive => "time_sensitive",
        News => "news",
    }
);

closed_enum!(
    DialogueFormat, "dialogue_format" {
        Monologue => "monologue",
        Interview => "interview",
        Discussion => "discussion",
        Presentation => "presentation",
    }
);

closed_enum!(
    /// Structural role of a segment inside a transcript body.
    SectionType, "section_type" {
        Intro => "intro",
        KeyPoint => "key_point",
        Detail => "detail",
        Conclusion => "conclusion",
    }
);

impl SectionType {
    /// Label used inside marker lines, e.g. `KEY_POINT`.
    pub fn marker_label(self) -> String {
        self.as_str().to_uppercase()
    }
}

// ── Pipeline status ──

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Unprocessed,
    Pending,
    #[serde(alias = "approved")]
    Uploaded,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Unprocessed => "unprocessed",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Uploaded => "uploaded",
            PipelineStatus::Failed => "failed",
        }
    }

    /// `uploaded` and `failed` never move without external action.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStatus::Uploaded | PipelineStatus::Failed)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_tag(s).as_str() {
            "" | "unprocessed" => Ok(PipelineStatus::Unprocessed),
            "pending" => Ok(PipelineStatus::Pending),
            "uploaded" | "approved" => Ok(PipelineStatus::Uploaded),
            "failed" => Ok(PipelineStatus::Failed),
            _ => Err(UnknownVariant {
                field: "status",
                value: s.to_string(),
            }),
        }
    }
}

/// Which half of the pipeline a failure happened in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailedStage {
    Analysis,
    Upload,
}

// ── Record ──

/// Metadata of one transcript as written by the upstream transcriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub channel: String,
    pub video_id: String,
    pub title: String,
    pub published_at: Date,
    pub duration: Option<String>,
    pub word_count: u64,
}

impl RecordMeta {
    /// Extract the typed record metadata from a parsed document.
    ///
    /// `fallback_id` is used when the block has no `video_id` (e.g. one
    /// recovered from the file name). A missing `word_count` is computed
    /// from the body.
    pub fn from_document(doc: &Document, fallback_id: Option<&str>) -> Result<Self, MetaError> {
        let meta = &doc.meta;
        let channel = required_str(meta, "channel")?;
        let video_id = match scalar_str(meta, "video_id") {
            Some(id) if !id.is_empty() => id,
            _ => fallback_id
                .map(str::to_string)
                .ok_or(MetaError::Missing("video_id"))?,
        };
        let title = required_str(meta, "title")?;
        let raw_date = required_str(meta, "published_at")?;
        let published_at = parse_published(&raw_date).ok_or(MetaError::Invalid {
            key: "published_at",
            value: raw_date,
        })?;
        let word_count = match scalar_str(meta, "word_count") {
            Some(raw) => raw.parse::<u64>().map_err(|_| MetaError::Invalid {
                key: "word_count",
                value: raw,
            })?,
            None => count_words(&doc.body),
        };

        Ok(Self {
            channel,
            video_id,
            title,
            published_at,
            duration: scalar_str(meta, "duration"),
            word_count,
        })
    }

    /// `YYYY-MM-DD`
    pub fn published_iso(&self) -> String {
        self.published_at
            .format(format_description!("[year]-[month]-[day]"))
            .unwrap_or_default()
    }

    /// `YYYYMMDD`
    pub fn published_compact(&self) -> String {
        self.published_at
            .format(format_description!("[year][month][day]"))
            .unwrap_or_default()
    }

    /// `YYYY-MM`
    pub fn published_month(&self) -> String {
        self.published_at
            .format(format_description!("[year]-[month]"))
            .unwrap_or_default()
    }

    /// Title shown in the knowledge store: `channel | title | date`.
    pub fn display_title(&self) -> String {
        format!("{} | {} | {}", self.channel, self.title, self.published_iso())
    }
}

fn scalar_str(meta: &Mapping, key: &str) -> Option<String> {
    match meta.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn required_str(meta: &Mapping, key: &'static str) -> Result<String, MetaError> {
    match scalar_str(meta, key) {
        Some(s) if !s.is_empty() => Ok(s),
        _ => Err(MetaError::Missing(key)),
    }
}

/// Parse a published date: `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYYMMDD`, or an
/// RFC 3339 timestamp whose date part is used.
pub fn parse_published(raw: &str) -> Option<Date> {
    let raw = raw.trim();
    let compact;
    let candidate = if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        compact = format!("{}-{}-{}", &raw[..4], &raw[4..6], &raw[6..]);
        compact.as_str()
    } else {
        raw.get(..10).unwrap_or(raw)
    };
    Date::parse(candidate, format_description!("[year]-[month]-[day]"))
        .or_else(|_| Date::parse(candidate, format_description!("[year]/[month]/[day]")))
        .ok()
}

/// Whitespace-separated word count.
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

// ── Analysis ──

/// One logical sub-section located by its opening quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub section_type: SectionType,
    pub title: String,
    pub start_quote: String,
}

/// Semantic analysis of one transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub semantic_summary: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_topic: Option<String>,
    pub content_type: ContentType,
    pub content_density: ContentDensity,
    pub temporal_relevance: TemporalRelevance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue_format: Option<DialogueFormat>,
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl AnalysisResult {
    /// Tags attached to the remote resource: suggested topic first, then
    /// topics and entities, de-duplicated in order.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        let suggested = self
            .suggested_topic
            .iter()
            .filter(|t| !t.is_empty() && t.as_str() != "unknown");
        for tag in suggested
            .chain(self.key_topics.iter())
            .chain(self.key_entities.iter())
        {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
        tags
    }
}

/// Provenance keys written next to the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub analyzed_by: String,
    pub analyzed_at: String,
    pub pipeline_version: String,
    pub source_path: String,
}

// ── Pipeline state ──

/// Keys owned by [`PipelineState`] inside an artifact's metadata block.
pub const STATE_KEYS: &[&str] = &[
    "status",
    "source_id",
    "error",
    "error_code",
    "failed_at",
    "failed_stage",
    "retries",
];

fn is_zero(n: &u32) -> bool {
    *n == 0
}

fn is_unprocessed(s: &PipelineStatus) -> bool {
    *s == PipelineStatus::Unprocessed
}

/// Lifecycle state of one record, persisted inside its artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default, skip_serializing_if = "is_unprocessed")]
    pub status: PipelineStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<FailedStage>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u32,
}

impl PipelineState {
    /// Read the state keys out of a metadata block, ignoring everything else.
    pub fn from_mapping(meta: &Mapping) -> Result<Self, serde_yaml::Error> {
        let mut own = Mapping::new();
        for key in STATE_KEYS {
            if let Some(v) = meta.get(*key) {
                if !v.is_null() {
                    own.insert(Value::from(*key), v.clone());
                }
            }
        }
        serde_yaml::from_value(Value::Mapping(own))
    }

    /// Replace the state keys of `meta` with this state. Cleared fields are
    /// removed rather than written as null.
    pub fn write_into(&self, meta: &mut Mapping) -> Result<(), serde_yaml::Error> {
        for key in STATE_KEYS {
            meta.shift_remove(*key);
        }
        frontmatter::merge_into(self, meta)
    }
}
