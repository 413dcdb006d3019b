use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use core_lib::schema::Schema;
use sift::{Artifact, Context, SiftError, TaskHandle};

///
/// Set-up logging and create a clean folder for test data under the target tmpdir.
///
/// Any files from a previous run of the same test are deleted first.
///
pub fn init_test(folder: &str) -> PathBuf {
    let _ = env_logger::builder().is_test(true).try_init();

    let base_dir = std::path::Path::new(env!("CARGO_TARGET_TMPDIR")).join(folder);
    let _ = std::fs::remove_dir_all(&base_dir);
    std::fs::create_dir_all(&base_dir)
        .unwrap_or_else(|_| panic!("Cannot create base dir {}", base_dir.to_string_lossy()));

    base_dir
}

///
/// Write a test data file into the folder and return its path.
///
pub fn write_file(base_dir: &std::path::Path, filename: &str, contents: &str) -> PathBuf {
    let path = base_dir.join(filename);
    std::fs::write(&path, contents)
        .unwrap_or_else(|_| panic!("Cannot write test file {}", path.to_string_lossy()));
    path
}

///
/// Parse and validate a schema from inline JSON.
///
pub fn schema(value: serde_json::Value) -> Arc<Schema> {
    Arc::new(Schema::from_value(value).expect("test schema should validate"))
}

///
/// Run the full pipeline over the given files with a fresh task handle.
///
pub fn run(schema: Arc<Schema>, files: Vec<PathBuf>) -> Result<Artifact, SiftError> {
    let ctx = Context::new(Uuid::new_v4(), schema, files, Arc::new(TaskHandle::new()));
    sift::run_task(&ctx)
}

///
/// The artifact as JSON with the run-dependent fields (task id, timestamps) removed,
/// ready for structural assertions.
///
pub fn stable_json(artifact: &Artifact) -> serde_json::Value {
    let mut value = serde_json::to_value(artifact).expect("artifact serialises");

    value.as_object_mut().unwrap().remove("task_id");
    let metadata = value["metadata"].as_object_mut().unwrap();
    metadata.remove("processed_at");
    metadata.remove("duration_ms");

    value
}
