//! Per-task status polling for asynchronous generation batches.
//!
//! Each task gets its own fixed-interval loop. Loops started for the same
//! generation session share a [`PollGroup`] so the whole batch can be torn
//! down at once.

use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::{interval_at, Instant, MissedTickBehavior}};
use tracing::{info, warn, debug};
use uuid::Uuid;

use crate::{
    api::StudioApi,
    models::{GeneratedImage, Provider, TaskStatus},
    session::SessionState,
};

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_failures: u32,
}

/// Live poll loops belonging to one generation session.
#[derive(Debug, Default)]
pub struct PollGroup {
    generation_id: Option<Uuid>,
    handles: Vec<JoinHandle<()>>,
}

impl PollGroup {
    /// Cancels whatever is running and adopts `generation_id`.
    pub fn restart(&mut self, generation_id: Uuid) {
        self.cancel();
        self.generation_id = Some(generation_id);
    }

    /// Starts a loop for `task_id` under `generation_id`, which must be the
    /// session this group currently owns.
    pub fn spawn(
        &mut self,
        api: Arc<dyn StudioApi>,
        state: Arc<RwLock<SessionState>>,
        generation_id: Uuid,
        task_id: String,
        settings: PollSettings,
    ) -> bool {
        if self.generation_id != Some(generation_id) {
            warn!("Refusing to poll {} for generation {} the group does not own", task_id, generation_id);
            return false;
        }
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(tokio::spawn(poll_task(api, state, generation_id, task_id, settings)));
        true
    }

    pub fn cancel(&mut self) {
        let live = self.live();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        if live > 0 {
            info!("🛑 Cancelled {} poll(s) for generation {:?}", live, self.generation_id);
        }
        self.generation_id = None;
    }

    pub fn live(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for PollGroup {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Polls one task until it completes, exhausts its failure budget, or its
/// generation is replaced. The first lookup happens one interval after start.
pub async fn poll_task(
    api: Arc<dyn StudioApi>,
    state: Arc<RwLock<SessionState>>,
    generation_id: Uuid,
    task_id: String,
    settings: PollSettings,
) {
    let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = 0u32;

    loop {
        ticker.tick().await;

        let update = match api.nano_record_info(&task_id).await {
            Ok(record) => {
                failures = 0;
                match record.resolved_url() {
                    Some(url) => GeneratedImage::completed(task_id.clone(), Provider::NanoBanana, url.to_string()),
                    None => {
                        debug!("Task {} not ready: {}", task_id, record.msg.as_deref().unwrap_or("no result yet"));
                        GeneratedImage::processing(task_id.clone(), Provider::NanoBanana)
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!("⚠️ Status lookup for task {} failed ({}/{}): {}", task_id, failures, settings.max_failures, e);
                if failures < settings.max_failures {
                    continue;
                }
                GeneratedImage {
                    status: TaskStatus::Failed,
                    ..GeneratedImage::processing(task_id.clone(), Provider::NanoBanana)
                }
            }
        };

        let status = update.status;
        let applied = state.write().upsert_task(generation_id, update);
        if !applied {
            debug!("Task {} belongs to a replaced generation; stopping", task_id);
            return;
        }
        match status {
            TaskStatus::Processing => debug!("⏳ Task {} still processing", task_id),
            TaskStatus::Completed => {
                info!("✅ Task {} completed", task_id);
                return;
            }
            TaskStatus::Failed => {
                warn!("❌ Task {} marked failed after {} consecutive errors", task_id, failures);
                return;
            }
        }
    }
}
