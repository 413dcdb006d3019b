use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use core_lib::schema::Schema;
use crate::error::ServiceError;
use crate::registry::Registry;
use crate::upload::{self, UploadItem};
use crate::worker::WorkerPool;
use crate::config::Config;

///
/// A decoded tool-call envelope from the transport. The id is opaque and echoed back
/// so the client can correlate responses on the event stream.
///
#[derive(Clone, Debug, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<Value>,
    pub tool: String,

    #[serde(default)]
    pub arguments: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct ToolResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

///
/// The tool surface. Everything here is synchronous and quick - reconciliation work
/// itself happens on the worker pool.
///
pub struct Tools {
    config: Arc<Config>,
    registry: Arc<Registry>,
    pool: Arc<WorkerPool>,
}

impl Tools {
    pub fn new(config: Arc<Config>, registry: Arc<Registry>, pool: Arc<WorkerPool>) -> Self {
        Self { config, registry, pool }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    ///
    /// Dispatch one tool call to its handler and wrap the outcome in a response
    /// envelope.
    ///
    pub fn dispatch(&self, call: ToolCall) -> ToolResponse {
        log::debug!("Dispatching tool call {}", call.tool);

        let outcome = match call.tool.as_str() {
            "reconciliation_start" => self.start(call.arguments),
            "reconciliation_status" => self.status(call.arguments),
            "reconciliation_result" => self.result(call.arguments),
            "reconciliation_list_tasks" => self.list(),
            "reconciliation_cancel" => self.cancel(call.arguments),
            "reconciliation_remove" => self.remove(call.arguments),
            "file_upload" => self.upload(call.arguments),
            _ => Err(ServiceError::UnknownTool { tool: call.tool.clone() }),
        };

        match outcome {
            Ok(result) => ToolResponse { id: call.id, result: Some(result), error: None },
            Err(err) => {
                log::warn!("Tool {} failed: {}", call.tool, err);
                ToolResponse {
                    id: call.id,
                    result: None,
                    error: Some(json!({ "kind": err.kind(), "message": err.to_string() })),
                }
            },
        }
    }

    fn start(&self, arguments: Value) -> Result<Value, ServiceError> {
        #[derive(Deserialize)]
        struct StartArgs {
            schema: Value,
            files: Vec<String>,

            #[serde(default)]
            callback_url: Option<String>,
        }

        let args: StartArgs = parse_args("reconciliation_start", arguments)?;
        let schema = Schema::from_value(args.schema)?;
        let files: Vec<PathBuf> = args.files.iter().map(PathBuf::from).collect();

        // Classification is pure pattern matching, so unclassifiable input can fail
        // the call synchronously instead of surfacing later as a failed task.
        sift::classify(&schema, &files)?;

        let task_id = self.registry.create(Arc::new(schema), files, args.callback_url);
        self.pool.submit(task_id);

        Ok(json!({ "task_id": task_id.to_string(), "status": "pending" }))
    }

    fn status(&self, arguments: Value) -> Result<Value, ServiceError> {
        let task_id = parse_task_id(arguments)?;
        let view = self.registry.status(task_id)?;
        Ok(serde_json::to_value(view).expect("status view serialises"))
    }

    fn result(&self, arguments: Value) -> Result<Value, ServiceError> {
        let task_id = parse_task_id(arguments)?;
        let artifact = self.registry.result(task_id)?;
        Ok(serde_json::to_value(artifact.as_ref()).expect("artifact serialises"))
    }

    fn list(&self) -> Result<Value, ServiceError> {
        Ok(serde_json::to_value(self.registry.list()).expect("task list serialises"))
    }

    fn cancel(&self, arguments: Value) -> Result<Value, ServiceError> {
        let task_id = parse_task_id(arguments)?;
        let state = self.registry.cancel(task_id)?;
        Ok(json!({ "task_id": task_id.to_string(), "status": state.as_str() }))
    }

    fn remove(&self, arguments: Value) -> Result<Value, ServiceError> {
        let task_id = parse_task_id(arguments)?;
        self.registry.remove(task_id)?;

        // Removal of the task record implies removal of its persisted artifact.
        let artifact_path = self.config.results_dir().join(format!("{}.json", task_id));
        if artifact_path.exists() {
            if let Err(err) = std::fs::remove_file(&artifact_path) {
                log::warn!("Could not delete artifact {}: {}", artifact_path.to_string_lossy(), err);
            }
        }

        Ok(json!({ "task_id": task_id.to_string(), "removed": true }))
    }

    fn upload(&self, arguments: Value) -> Result<Value, ServiceError> {
        // The batch arrives either as a bare list or wrapped in {"files": [...]}.
        let items: Vec<UploadItem> = match arguments {
            Value::Array(_) => parse_args("file_upload", arguments)?,
            Value::Object(mut object) => match object.remove("files") {
                Some(files) => parse_args("file_upload", files)?,
                None => return Err(ServiceError::BadArguments {
                    tool: "file_upload".into(),
                    reason: "expected a list of files".into(),
                }),
            },
            _ => return Err(ServiceError::BadArguments {
                tool: "file_upload".into(),
                reason: "expected a list of files".into(),
            }),
        };

        let outcomes = upload::store_all(&self.config, items);
        Ok(serde_json::to_value(outcomes).expect("upload outcomes serialise"))
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ServiceError> {
    serde_json::from_value(arguments)
        .map_err(|err| ServiceError::BadArguments { tool: tool.into(), reason: err.to_string() })
}

fn parse_task_id(arguments: Value) -> Result<Uuid, ServiceError> {
    #[derive(Deserialize)]
    struct TaskArgs {
        task_id: String,
    }

    let args: TaskArgs = parse_args("task_id", arguments)?;
    Uuid::parse_str(&args.task_id)
        .map_err(|_| ServiceError::TaskNotFound { task_id: args.task_id })
}
