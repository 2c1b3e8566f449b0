use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    error::StudioError,
    models::{
        Candidate, CandidateKey, GeneratedImage, LoadState, MatchKind, ProductInfo,
        SelectedImage, StoredAnalysis,
    },
    upload::SourceImage,
};

const LABELS_SHOWN: usize = 8;

/// Everything one page view knows. Mutated only through the methods below.
#[derive(Debug, Default)]
pub struct SessionState {
    pub image: Option<SourceImage>,
    /// Bumped on every new image so in-flight analyses can tell they are stale.
    pub image_revision: u64,
    pub analysis: Option<StoredAnalysis>,
    pub analysis_revision: u64,
    pub product_info: ProductInfo,
    pub load_states: HashMap<CandidateKey, LoadState>,
    pub selected: Vec<SelectedImage>,
    pub filtering: bool,
    pub reviewing: bool,
    /// Bumped by every generate request and by clear; a request whose
    /// revision is no longer current drops its results.
    pub generation_revision: u64,
    pub generation_id: Option<Uuid>,
    pub generated: Vec<GeneratedImage>,
    pub busy: bool,
    pub error: Option<String>,
}

impl SessionState {
    pub fn select_image(&mut self, image: SourceImage) {
        self.image = Some(image);
        self.image_revision += 1;
        self.analysis = None;
        self.error = None;
        self.reset_review();
    }

    /// Back to a blank form. Generation tasks are cancelled by the owner.
    pub fn clear(&mut self) {
        let image_revision = self.image_revision + 1;
        let analysis_revision = self.analysis_revision + 1;
        let generation_revision = self.generation_revision + 1;
        *self = Self { image_revision, analysis_revision, generation_revision, ..Self::default() };
    }

    pub fn apply_analysis(&mut self, analysis: StoredAnalysis) {
        if let Some(fill) = analysis.parsed.auto_fill() {
            self.product_info.merge_auto_fill(fill);
        }
        self.reset_review();
        self.load_states = analysis
            .candidates()
            .into_iter()
            .map(|c| (c.key, LoadState::Loading))
            .collect();
        self.analysis = Some(analysis);
        self.analysis_revision += 1;
        self.filtering = true;
    }

    fn reset_review(&mut self) {
        self.load_states.clear();
        self.selected.clear();
        self.reviewing = false;
        self.filtering = false;
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.analysis.as_ref().map(StoredAnalysis::candidates).unwrap_or_default()
    }

    pub fn load_state(&self, key: &CandidateKey) -> LoadState {
        self.load_states.get(key).copied().unwrap_or(LoadState::Loading)
    }

    pub fn valid_count(&self) -> usize {
        self.candidates()
            .iter()
            .filter(|c| self.load_state(&c.key) != LoadState::Failed)
            .count()
    }

    pub fn set_load_state(&mut self, index: usize, state: LoadState) -> Result<(), StudioError> {
        let candidate = self
            .candidates()
            .into_iter()
            .nth(index)
            .ok_or_else(|| StudioError::Validation(format!("No candidate image at index {}", index)))?;
        self.load_states.insert(candidate.key, state);
        Ok(())
    }

    pub fn is_selected(&self, url: &str) -> bool {
        self.selected.iter().any(|s| s.url == url)
    }

    /// Identity is the URL alone; the index is whatever it was at click time.
    pub fn toggle_selection(&mut self, url: &str, index: usize) {
        match self.selected.iter().position(|s| s.url == url) {
            Some(pos) => {
                self.selected.remove(pos);
            }
            None => self.selected.push(SelectedImage { url: url.to_string(), index }),
        }
    }

    /// Claims the generation slot for a new request.
    pub fn next_generation_revision(&mut self) -> u64 {
        self.generation_revision += 1;
        self.generation_revision
    }

    pub fn begin_generation(&mut self, generation_id: Uuid, records: Vec<GeneratedImage>) {
        self.generation_id = Some(generation_id);
        self.generated = records;
    }

    /// Keyed merge of one task's record. Returns false when the update belongs
    /// to a generation that has since been replaced or names an unknown task.
    pub fn upsert_task(
        &mut self,
        generation_id: Uuid,
        update: GeneratedImage,
    ) -> bool {
        if self.generation_id != Some(generation_id) {
            return false;
        }
        match self.generated.iter_mut().find(|g| g.id == update.id) {
            Some(existing) => {
                existing.status = update.status;
                if update.url.is_some() {
                    existing.url = update.url;
                }
                existing.updated_at = update.updated_at;
                true
            }
            None => false,
        }
    }

    pub fn all_settled(&self) -> bool {
        !self.generated.is_empty() && self.generated.iter().all(|g| g.status.is_terminal())
    }

    pub fn view(&self, id: Uuid) -> StudioView {
        let candidates: Vec<CandidateView> = self
            .candidates()
            .into_iter()
            .enumerate()
            .map(|(index, c)| CandidateView {
                index,
                load_state: self.load_state(&c.key),
                selected: self.is_selected(&c.url),
                bucket: c.key.kind,
                url: c.url,
            })
            .collect();
        let labels = self.analysis.as_ref().map(StoredAnalysis::labels).unwrap_or_default();

        StudioView {
            id,
            image: self.image.as_ref().map(|image| ImageSummary {
                file_name: image.file_name.clone(),
                content_type: image.content_type.clone(),
                size_mb: format!("{:.2}", image.size_mb()),
                preview_url: image.preview_url(),
            }),
            analysis: self.analysis.as_ref().map(|a| a.raw.clone()),
            label_count: labels.len(),
            labels: labels
                .iter()
                .take(LABELS_SHOWN)
                .map(|l| LabelView {
                    label: l.label.clone(),
                    confidence_percent: (l.confidence.clamp(0.0, 1.0) * 100.0).round() as u8,
                })
                .collect(),
            valid_count: self.valid_count(),
            total_count: candidates.len(),
            candidates,
            filtering: self.filtering,
            reviewing: self.reviewing,
            auto_filled: self.analysis.as_ref().is_some_and(|a| a.parsed.auto_fill().is_some()),
            product_info: self.product_info.clone(),
            selected: self.selected.clone(),
            generated: self.generated.clone(),
            all_settled: self.all_settled(),
            busy: self.busy,
            error: self.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StudioView {
    pub id: Uuid,
    pub image: Option<ImageSummary>,
    pub analysis: Option<Value>,
    pub labels: Vec<LabelView>,
    pub label_count: usize,
    pub candidates: Vec<CandidateView>,
    pub valid_count: usize,
    pub total_count: usize,
    pub filtering: bool,
    pub reviewing: bool,
    pub product_info: ProductInfo,
    pub auto_filled: bool,
    pub selected: Vec<SelectedImage>,
    pub generated: Vec<GeneratedImage>,
    pub all_settled: bool,
    pub busy: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub file_name: String,
    pub content_type: String,
    pub size_mb: String,
    pub preview_url: String,
}

#[derive(Debug, Serialize)]
pub struct LabelView {
    pub label: String,
    pub confidence_percent: u8,
}

#[derive(Debug, Serialize)]
pub struct CandidateView {
    pub index: usize,
    pub url: String,
    pub bucket: MatchKind,
    pub load_state: LoadState,
    pub selected: bool,
}
