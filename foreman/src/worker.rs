use crossbeam::channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;
use sift::{Context, SiftError};
use crate::{config::Config, registry::Registry};

// The callback retry schedule: immediately, after 5s, after a further 30s.
const CALLBACK_DELAYS: [u64; 3] = [0, 5, 30];

///
/// A fixed pool of worker threads servicing the pending-task queue.
///
/// Each worker loop: pop a task id, claim it (pending -> running), run the pipeline,
/// move the task to its terminal state under the registry lock, then fire the
/// completion callback outside the lock.
///
pub struct WorkerPool {
    sender: channel::Sender<Uuid>,
    _handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(config: Arc<Config>, registry: Arc<Registry>) -> Self {
        let (sender, receiver) = channel::unbounded::<Uuid>();

        let handles = (0..config.max_concurrent_tasks())
            .map(|idx| {
                let receiver = receiver.clone();
                let registry = registry.clone();
                let config = config.clone();

                thread::Builder::new()
                    .name(format!("worker-{}", idx))
                    .spawn(move || worker_loop(receiver, registry, config))
                    .expect("cannot spawn worker thread")
            })
            .collect();

        log::info!("Started {} reconciliation worker(s)", config.max_concurrent_tasks());

        Self { sender, _handles: handles }
    }

    ///
    /// Queue a pending task for execution.
    ///
    pub fn submit(&self, task_id: Uuid) {
        let _ignore = self.sender.send(task_id);
    }
}

fn worker_loop(receiver: channel::Receiver<Uuid>, registry: Arc<Registry>, config: Arc<Config>) {
    for task_id in receiver.iter() {
        process(task_id, &registry, &config);
    }
}

fn process(task_id: Uuid, registry: &Registry, config: &Config) {
    let budget = Duration::from_secs(config.task_timeout_seconds());

    // A task canceled while queued is no longer claimable - just move on.
    let (schema, files, handle) = match registry.claim(task_id, budget) {
        Some(claimed) => claimed,
        None => return,
    };

    let ctx = Context::new(task_id, schema, files, handle);

    match sift::run_task(&ctx) {
        Ok(artifact) => {
            let artifact = Arc::new(artifact);
            match artifact.write(config.results_dir()) {
                Ok(path) => {
                    log::info!("Task {} artifact written to {}", task_id, path.to_string_lossy());
                    registry.complete(task_id, artifact);
                },
                Err(err) => {
                    log::error!("Task {} completed but its artifact could not be written: {}", task_id, err);
                    registry.fail(task_id, err.to_string());
                },
            }
        },
        Err(SiftError::Canceled) => registry.mark_canceled(task_id, None),
        Err(SiftError::TimedOut) => registry.mark_canceled(task_id, Some("TimedOut".into())),
        Err(err) => registry.fail(task_id, err.to_string()),
    }

    fire_callback(task_id, registry);
}

///
/// POST the completion envelope to the task's callback URL, retrying on the fixed
/// schedule. Callback failures are logged and never alter task state.
///
fn fire_callback(task_id: Uuid, registry: &Registry) {
    let view = match registry.callback_view(task_id) {
        Some(view) => view,
        None => return,
    };

    let url = match view.callback_url {
        Some(url) => url,
        None => return,
    };

    let summary = view.artifact
        .as_ref()
        .and_then(|artifact| serde_json::to_value(artifact.summary()).ok())
        .unwrap_or(serde_json::Value::Null);

    let mut envelope = serde_json::json!({
        "task_id": task_id.to_string(),
        "status": view.status,
        "summary": summary,
    });

    if let Some(error) = view.error {
        envelope["error"] = serde_json::Value::String(error);
    }

    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build() {
        Ok(client) => client,
        Err(err) => {
            log::error!("Cannot build callback client for task {}: {}", task_id, err);
            return
        },
    };

    for (attempt, delay) in CALLBACK_DELAYS.iter().enumerate() {
        thread::sleep(Duration::from_secs(*delay));

        match client.post(&url).json(&envelope).send() {
            Ok(response) if response.status().is_success() => {
                log::info!("Callback for task {} delivered to {} on attempt {}", task_id, url, attempt + 1);
                return
            },
            Ok(response) => {
                log::warn!("Callback for task {} to {} returned {} on attempt {}", task_id, url, response.status(), attempt + 1);
            },
            Err(err) => {
                log::warn!("Callback for task {} to {} failed on attempt {}: {}", task_id, url, attempt + 1, err);
            },
        }
    }

    log::error!("Callback for task {} to {} failed after {} attempts - giving up", task_id, url, CALLBACK_DELAYS.len());
}
