use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::error::StudioError;

// --- Analysis ---

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<AnalysisData>,
    #[serde(default)]
    pub gpt_response: Option<Value>,
}

impl AnalysisResponse {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    pub fn auto_fill(&self) -> Option<&Map<String, Value>> {
        self.gpt_response.as_ref().and_then(Value::as_object)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AnalysisData {
    #[serde(default)]
    pub detected_labels: Option<Vec<DetectedLabel>>,
    #[serde(default)]
    pub web_matches: Option<WebMatches>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DetectedLabel {
    pub label: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct WebMatches {
    #[serde(default)]
    pub similar_images: Option<Vec<String>>,
    #[serde(default)]
    pub partial_matches: Option<Vec<String>>,
    #[serde(default)]
    pub full_matches: Option<Vec<String>>,
}

/// The analysis body exactly as received, next to its typed reading.
#[derive(Debug, Clone)]
pub struct StoredAnalysis {
    pub raw: Value,
    pub parsed: AnalysisResponse,
}

impl StoredAnalysis {
    pub fn from_raw(raw: Value) -> Result<Self, StudioError> {
        let parsed: AnalysisResponse = serde_json::from_value(raw.clone())
            .map_err(|e| StudioError::Parse(format!("analysis response: {}", e)))?;
        Ok(Self { raw, parsed })
    }

    pub fn labels(&self) -> &[DetectedLabel] {
        self.parsed
            .data
            .as_ref()
            .and_then(|d| d.detected_labels.as_deref())
            .unwrap_or_default()
    }

    /// Similar, partial, then full matches, order preserved, duplicates kept.
    pub fn candidates(&self) -> Vec<Candidate> {
        let Some(matches) = self.parsed.data.as_ref().and_then(|d| d.web_matches.as_ref()) else {
            return Vec::new();
        };
        let buckets = [
            (MatchKind::Similar, &matches.similar_images),
            (MatchKind::Partial, &matches.partial_matches),
            (MatchKind::Full, &matches.full_matches),
        ];
        buckets
            .into_iter()
            .flat_map(|(kind, urls)| {
                urls.iter().flatten().enumerate().map(move |(position, url)| Candidate {
                    key: CandidateKey { kind, position },
                    url: url.clone(),
                })
            })
            .collect()
    }

    /// Pretty-printed with two-space indent in the order the keys arrived.
    pub fn export_json(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Similar,
    Partial,
    Full,
}

/// Identifies a candidate by its bucket and its place inside that bucket.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidateKey {
    pub kind: MatchKind,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: CandidateKey,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Loading,
    Loaded,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SelectedImage {
    pub url: String,
    pub index: usize,
}

// --- Product form ---

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ProductInfo {
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default, rename = "SKU")]
    pub sku: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub description: String,
    /// Auto-filled keys the form has no dedicated field for.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ProductInfo {
    pub fn set_field(&mut self, key: &str, value: String) {
        let slot = match key {
            "product_name" => &mut self.product_name,
            "brand" => &mut self.brand,
            "SKU" => &mut self.sku,
            "category" => &mut self.category,
            "color" => &mut self.color,
            "material" => &mut self.material,
            "description" => &mut self.description,
            other => {
                self.extra.insert(other.to_string(), value);
                return;
            }
        };
        *slot = value;
    }

    /// Last write wins on matching keys. Nulls are skipped.
    pub fn merge_auto_fill(&mut self, fields: &Map<String, Value>) {
        for (key, value) in fields {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            self.set_field(key, text);
        }
    }
}

// --- Generation ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    NanoBanana,
    Photoroom,
    Stability,
    Dalle,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NanoBanana => "nano-banana",
            Self::Photoroom => "photoroom",
            Self::Stability => "stability",
            Self::Dalle => "dalle",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            Self::NanoBanana => "/api/image/enhance-nano",
            Self::Photoroom => "/api/image/enhance-image",
            Self::Stability => "/api/image/process-with-stability-ai",
            Self::Dalle => "/api/image/edit-with-dalle",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = StudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nano-banana" | "nano" | "nanobanana" => Ok(Self::NanoBanana),
            "photoroom" => Ok(Self::Photoroom),
            "stability" | "stability-ai" | "stable-diffusion" => Ok(Self::Stability),
            "dalle" | "gemini" => Ok(Self::Dalle),
            other => Err(StudioError::Validation(format!("Unknown provider: {}", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeneratedImage {
    pub id: String,
    pub provider: Provider,
    pub url: Option<String>,
    pub status: TaskStatus,
    pub updated_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn completed(id: String, provider: Provider, url: String) -> Self {
        Self { id, provider, url: Some(url), status: TaskStatus::Completed, updated_at: Utc::now() }
    }

    pub fn processing(id: String, provider: Provider) -> Self {
        Self { id, provider, url: None, status: TaskStatus::Processing, updated_at: Utc::now() }
    }
}

// --- Provider response shapes ---

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NanoSubmission {
    #[serde(default)]
    pub results: Vec<NanoTaskDescriptor>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NanoTaskDescriptor {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl NanoTaskDescriptor {
    /// A task id and no error flag means the task is worth polling.
    pub fn pollable_id(&self) -> Option<&str> {
        let flagged_error = match &self.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        let failed_status = matches!(
            self.status.as_ref().and_then(Value::as_str),
            Some("error" | "failed")
        );
        if flagged_error || failed_status {
            return None;
        }
        self.task_id.as_deref().filter(|id| !id.is_empty())
    }
}

pub const RECORD_SUCCESS_CODE: i64 = 200;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecordInfo {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<RecordData>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecordData {
    #[serde(default)]
    pub response: Option<RecordResponse>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RecordResponse {
    #[serde(default, rename = "resultImageUrl")]
    pub result_image_url: Option<String>,
}

impl RecordInfo {
    pub fn resolved_url(&self) -> Option<&str> {
        if self.code != Some(RECORD_SUCCESS_CODE) {
            return None;
        }
        self.data
            .as_ref()?
            .response
            .as_ref()?
            .result_image_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EditResponse {
    #[serde(default)]
    pub data: Option<EditData>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct EditData {
    #[serde(default)]
    pub image_url: Option<String>,
}

impl EditResponse {
    pub fn image_url(&self) -> Option<&str> {
        self.data.as_ref()?.image_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PhotoroomResponse {
    #[serde(default)]
    pub images: Vec<Value>,
}

impl PhotoroomResponse {
    /// Entries are either bare URL strings or objects carrying one.
    pub fn image_urls(&self) -> Vec<String> {
        self.images
            .iter()
            .filter_map(|entry| match entry {
                Value::String(url) => Some(url.as_str()),
                Value::Object(map) => ["url", "image_url", "imageUrl"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(Value::as_str)),
                _ => None,
            })
            .filter(|url| !url.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn analysis(web_matches: Value) -> StoredAnalysis {
        StoredAnalysis::from_raw(json!({
            "status": "success",
            "data": { "detected_labels": [], "web_matches": web_matches }
        }))
        .unwrap()
    }

    #[test]
    fn candidates_concatenate_buckets_in_order() {
        let stored = analysis(json!({
            "similar_images": ["a", "b"],
            "partial_matches": ["c"],
            "full_matches": ["d"]
        }));
        let urls: Vec<String> = stored.candidates().into_iter().map(|c| c.url).collect();
        assert_eq!(urls, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn candidates_keep_duplicates_with_distinct_keys() {
        let stored = analysis(json!({
            "similar_images": ["a"],
            "partial_matches": ["a"]
        }));
        let candidates = stored.candidates();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].key, CandidateKey { kind: MatchKind::Similar, position: 0 });
        assert_eq!(candidates[1].key, CandidateKey { kind: MatchKind::Partial, position: 0 });
    }

    #[test]
    fn candidates_are_empty_when_buckets_absent_or_null() {
        assert!(analysis(json!({})).candidates().is_empty());
        assert!(analysis(json!({ "similar_images": null })).candidates().is_empty());
        let no_data = StoredAnalysis::from_raw(json!({ "status": "success" })).unwrap();
        assert!(no_data.candidates().is_empty());
        assert!(no_data.labels().is_empty());
    }

    #[test]
    fn export_preserves_key_order_and_two_space_indent() {
        let stored = StoredAnalysis::from_raw(json!({ "status": "success", "b": 1, "a": [true] })).unwrap();
        assert_eq!(
            stored.export_json(),
            "{\n  \"status\": \"success\",\n  \"b\": 1,\n  \"a\": [\n    true\n  ]\n}"
        );
    }

    #[test]
    fn auto_fill_overwrites_matching_keys() {
        let mut info = ProductInfo { product_name: "Foo".into(), brand: "Keep".into(), ..Default::default() };
        let fill = json!({ "product_name": "Bar", "SKU": 42, "season": "winter", "color": null });
        info.merge_auto_fill(fill.as_object().unwrap());
        assert_eq!(info.product_name, "Bar");
        assert_eq!(info.brand, "Keep");
        assert_eq!(info.sku, "42");
        assert_eq!(info.color, "");
        assert_eq!(info.extra.get("season").map(String::as_str), Some("winter"));
    }

    #[test]
    fn product_info_serializes_sku_in_upper_case() {
        let info = ProductInfo { sku: "X-1".into(), ..Default::default() };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["SKU"], json!("X-1"));
    }

    #[test]
    fn provider_tags_parse_with_aliases() {
        assert_eq!("nano-banana".parse::<Provider>().unwrap(), Provider::NanoBanana);
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Dalle);
        assert_eq!("stable-diffusion".parse::<Provider>().unwrap(), Provider::Stability);
        assert!("midjourney".parse::<Provider>().is_err());
    }

    #[test]
    fn descriptor_with_error_flag_is_not_pollable() {
        let ok: NanoTaskDescriptor = serde_json::from_value(json!({ "task_id": "t1" })).unwrap();
        let errored: NanoTaskDescriptor =
            serde_json::from_value(json!({ "task_id": "t2", "error": "quota" })).unwrap();
        let failed: NanoTaskDescriptor =
            serde_json::from_value(json!({ "task_id": "t3", "status": "failed" })).unwrap();
        let missing: NanoTaskDescriptor = serde_json::from_value(json!({ "task_id": null })).unwrap();
        assert_eq!(ok.pollable_id(), Some("t1"));
        assert_eq!(errored.pollable_id(), None);
        assert_eq!(failed.pollable_id(), None);
        assert_eq!(missing.pollable_id(), None);
    }

    #[test]
    fn record_resolves_only_with_success_code_and_url() {
        let done: RecordInfo = serde_json::from_value(json!({
            "code": 200, "data": { "response": { "resultImageUrl": "https://x/y.png" } }
        }))
        .unwrap();
        let pending: RecordInfo = serde_json::from_value(json!({ "code": 200, "data": {} })).unwrap();
        let wrong_code: RecordInfo = serde_json::from_value(json!({
            "code": 500, "data": { "response": { "resultImageUrl": "https://x/y.png" } }
        }))
        .unwrap();
        assert_eq!(done.resolved_url(), Some("https://x/y.png"));
        assert_eq!(pending.resolved_url(), None);
        assert_eq!(wrong_code.resolved_url(), None);
    }

    #[test]
    fn photoroom_accepts_strings_and_objects() {
        let resp: PhotoroomResponse = serde_json::from_value(json!({
            "images": ["https://a", { "url": "https://b" }, { "image_url": "https://c" }, 7, ""]
        }))
        .unwrap();
        assert_eq!(resp.image_urls(), vec!["https://a", "https://b", "https://c"]);
    }
}
