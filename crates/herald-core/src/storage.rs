// JSON file persistence shared by the schedule and FAQ stores.
//
// Each store is a single JSON array. A missing file is an empty store and an
// unparseable one is logged and treated as empty, so the next save replaces
// it. Any other read failure is returned: the caller must not save over a
// file it could not read.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

/// Read the raw records of a store file.
pub(crate) async fn load_values(path: &Path) -> Result<Vec<Value>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let values = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Array(items)) => items,
        Ok(other) => {
            warn!(
                "store {} is not a JSON array (found {}), treating as empty",
                path.display(),
                json_kind(&other)
            );
            Vec::new()
        }
        Err(e) => {
            warn!("store {} is corrupt, treating as empty: {e}", path.display());
            Vec::new()
        }
    };
    Ok(values)
}

/// Replace the store file with `records`.
pub(crate) async fn save_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let payload = serde_json::to_string_pretty(records)?;
    atomic_write(path, &payload).await
}

/// Atomic write using temp file and rename
async fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    if let Err(e) = fs::write(&temp_path, content).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
