use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{info, error, debug};
use uuid::Uuid;

use crate::{
    api::StudioApi,
    config::StudioSettings,
    error::{Operation, StudioError},
    generation::{run_four_angles, run_photoroom, NANO_PROMPT},
    models::{GeneratedImage, LoadState, Provider, StoredAnalysis},
    polling::{PollGroup, PollSettings},
    session::{SessionState, StudioView},
    upload::{SourceImage, MISSING_IMAGE},
};

/// What an outbound call needs, captured when it starts.
struct Ticket {
    image: SourceImage,
    image_revision: u64,
    generation_revision: u64,
}

enum Batch {
    /// Finished images, shown as they are.
    Images(Vec<GeneratedImage>),
    /// Task ids still to be polled.
    Tasks(Vec<String>),
}

/// One page view's worth of workflow: state plus the calls that change it.
pub struct Studio {
    id: Uuid,
    api: Arc<dyn StudioApi>,
    settings: StudioSettings,
    state: Arc<RwLock<SessionState>>,
    polls: Mutex<PollGroup>,
}

impl Studio {
    pub fn new(api: Arc<dyn StudioApi>, settings: StudioSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            api,
            settings,
            state: Arc::default(),
            polls: Mutex::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn view(&self) -> StudioView {
        self.state.read().view(self.id)
    }

    /// Stores the banner text for `err` and hands the error back.
    pub fn report(&self, op: Operation, err: StudioError) -> StudioError {
        let banner = err.user_message(op);
        error!("❌ Studio {} {:?} failed: {}", self.id, op, err);
        let mut state = self.state.write();
        state.error = Some(banner);
        state.busy = false;
        err
    }

    pub fn dismiss_error(&self) {
        self.state.write().error = None;
    }

    pub fn select_image(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<(), StudioError> {
        let image = SourceImage::new(file_name, content_type, bytes, self.settings.upload_max_bytes)
            .map_err(|e| self.report(Operation::Upload, e))?;
        info!("📸 Studio {} selected {} ({:.2} MB, {})", self.id, image.file_name, image.size_mb(), image.content_type);
        self.state.write().select_image(image);
        Ok(())
    }

    pub fn clear(&self) {
        let mut polls = self.polls.lock();
        polls.cancel();
        self.state.write().clear();
        info!("🗑️ Studio {} cleared", self.id);
    }

    /// Cancels outstanding polls; the studio is about to be dropped.
    pub fn shutdown(&self) {
        self.polls.lock().cancel();
    }

    /// Takes the current image for an outbound call, or records why it can't.
    /// A generate request also claims the generation slot.
    fn begin(&self, op: Operation) -> Result<Ticket, StudioError> {
        let mut state = self.state.write();
        state.error = None;
        let Some(image) = state.image.clone() else {
            drop(state);
            return Err(self.report(op, StudioError::Validation(MISSING_IMAGE.to_string())));
        };
        state.busy = true;
        let generation_revision = match op {
            Operation::Generate => state.next_generation_revision(),
            _ => state.generation_revision,
        };
        Ok(Ticket { image, image_revision: state.image_revision, generation_revision })
    }

    pub async fn analyze(&self) -> Result<(), StudioError> {
        let ticket = self.begin(Operation::Analyze)?;
        info!("🔍 Studio {} analyzing {}", self.id, ticket.image.file_name);

        let result = self
            .api
            .analyze(&ticket.image)
            .await
            .and_then(StoredAnalysis::from_raw)
            .and_then(|analysis| {
                if analysis.parsed.is_success() {
                    Ok(analysis)
                } else {
                    Err(StudioError::rejected(analysis.parsed.message.clone()))
                }
            });

        let analysis_revision = {
            let mut state = self.state.write();
            state.busy = false;
            if state.image_revision != ticket.image_revision {
                debug!("Discarding analysis outcome for a replaced image in studio {}", self.id);
                return result.map(|_| ());
            }
            match result {
                Ok(analysis) => {
                    state.apply_analysis(analysis);
                    state.analysis_revision
                }
                Err(e) => {
                    drop(state);
                    return Err(self.report(Operation::Analyze, e));
                }
            }
        };
        info!("✅ Studio {} analysis stored ({} candidates)", self.id, self.state.read().candidates().len());

        let state = Arc::clone(&self.state);
        let delay = self.settings.filter_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = state.write();
            if state.analysis_revision == analysis_revision {
                state.filtering = false;
            }
        });
        Ok(())
    }

    pub fn update_product_info(&self, fields: BTreeMap<String, String>) {
        let mut state = self.state.write();
        for (key, value) in fields {
            state.product_info.set_field(&key, value);
        }
    }

    pub fn set_load_state(&self, index: usize, load_state: LoadState) -> Result<(), StudioError> {
        let result = self.state.write().set_load_state(index, load_state);
        result.map_err(|e| self.report(Operation::Review, e))
    }

    pub fn toggle_selection(&self, url: &str, index: usize) {
        self.state.write().toggle_selection(url, index);
    }

    pub fn set_reviewing(&self, open: bool) {
        self.state.write().reviewing = open;
    }

    pub fn export_json(&self) -> Option<String> {
        self.state.read().analysis.as_ref().map(StoredAnalysis::export_json)
    }

    /// Runs one generation request. Results land only if no clear or newer
    /// generate happened while the request was in flight.
    pub async fn generate(&self, provider: Provider) -> Result<(), StudioError> {
        let ticket = self.begin(Operation::Generate)?;
        let batch = match provider {
            Provider::NanoBanana => self.submit_nano(&ticket.image).await.map(Batch::Tasks),
            Provider::Photoroom => run_photoroom(self.api.as_ref(), &ticket.image)
                .await
                .map(Batch::Images),
            Provider::Stability | Provider::Dalle => {
                run_four_angles(self.api.as_ref(), provider, &ticket.image)
                    .await
                    .map(Batch::Images)
            }
        };

        match batch {
            Ok(batch) => {
                if let Some(generation_id) = self.commit(ticket.generation_revision, batch) {
                    info!("✅ Studio {} started generation {} with {}", self.id, generation_id, provider);
                }
                Ok(())
            }
            Err(e) => {
                if self.state.read().generation_revision != ticket.generation_revision {
                    debug!("Dropping {} failure from a superseded request in studio {}: {}", provider, self.id, e);
                    return Err(e);
                }
                Err(self.report(Operation::Generate, e))
            }
        }
    }

    /// Installs `batch` as the new generation session and starts its polls,
    /// unless `revision` has been superseded. Restart, records and spawns all
    /// happen under one polls guard.
    fn commit(&self, revision: u64, batch: Batch) -> Option<Uuid> {
        let mut polls = self.polls.lock();
        let mut state = self.state.write();
        if state.generation_revision != revision {
            debug!("Dropping results of superseded generation request in studio {}", self.id);
            return None;
        }
        state.busy = false;

        let generation_id = Uuid::new_v4();
        polls.restart(generation_id);
        let task_ids = match batch {
            Batch::Images(images) => {
                state.begin_generation(generation_id, images);
                return Some(generation_id);
            }
            Batch::Tasks(task_ids) => task_ids,
        };
        let records = task_ids
            .iter()
            .map(|id| GeneratedImage::processing(id.clone(), Provider::NanoBanana))
            .collect();
        state.begin_generation(generation_id, records);
        drop(state);

        let poll_settings = PollSettings {
            interval: self.settings.poll_interval,
            max_failures: self.settings.poll_max_failures,
        };
        for task_id in task_ids {
            let (api, state) = (Arc::clone(&self.api), Arc::clone(&self.state));
            polls.spawn(api, state, generation_id, task_id, poll_settings);
        }
        info!("🚀 Studio {} polling {} task(s) for generation {}", self.id, polls.live(), generation_id);
        Some(generation_id)
    }

    /// Submits the nano-banana batch and returns the ids worth polling.
    async fn submit_nano(&self, image: &SourceImage) -> Result<Vec<String>, StudioError> {
        info!("🍌 Studio {} submitting nano-banana batch", self.id);
        let submission = self.api.submit_nano(image, NANO_PROMPT).await?;
        if submission.results.is_empty() {
            return Err(StudioError::rejected(Some("No generation tasks were returned".into())));
        }

        let task_ids: Vec<String> = submission
            .results
            .iter()
            .filter_map(|r| r.pollable_id())
            .map(str::to_string)
            .collect();
        if task_ids.is_empty() {
            return Err(StudioError::rejected(Some("Every generation task was rejected".into())));
        }
        Ok(task_ids)
    }

    #[cfg(test)]
    pub(crate) fn live_polls(&self) -> usize {
        self.polls.lock().live()
    }
}
