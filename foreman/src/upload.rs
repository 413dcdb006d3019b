use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;
use crate::{config::Config, error::ServiceError};

///
/// One file in a file_upload batch. The payload arrives either as raw text in `data`
/// or base64 in `base64`.
///
#[derive(Clone, Debug, Deserialize)]
pub struct UploadItem {
    filename: String,

    #[serde(default)]
    data: Option<String>,

    #[serde(default)]
    base64: Option<String>,

    #[serde(default)]
    size: Option<u64>,

    #[serde(default)]
    mime_type: Option<String>,

    #[serde(default)]
    related_id: Option<String>,
}

///
/// Per-item result. A failed item carries its error; its siblings are unaffected.
///
#[derive(Clone, Debug, Serialize)]
pub struct UploadOutcome {
    filename: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    related_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<UploadError>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadError {
    kind: String,
    message: String,
}

impl UploadOutcome {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

///
/// Materialise a batch of uploads. Items succeed or fail individually.
///
pub fn store_all(config: &Config, items: Vec<UploadItem>) -> Vec<UploadOutcome> {
    items.into_iter()
        .map(|item| {
            let filename = item.filename.clone();
            let related_id = item.related_id.clone();

            match store_one(config, item) {
                Ok(path) => UploadOutcome {
                    filename,
                    path: Some(path.to_string_lossy().into()),
                    related_id,
                    error: None,
                },
                Err(err) => UploadOutcome {
                    filename,
                    path: None,
                    related_id,
                    error: Some(UploadError { kind: err.kind().into(), message: err.to_string() }),
                },
            }
        })
        .collect()
}

fn store_one(config: &Config, item: UploadItem) -> Result<PathBuf, ServiceError> {
    if !config.extension_allowed(&item.filename) {
        return Err(ServiceError::UnsupportedType { filename: item.filename })
    }

    let bytes = match (&item.base64, &item.data) {
        (Some(encoded), _) => STANDARD.decode(encoded.trim())
            .map_err(|_| ServiceError::DecodeFailed { filename: item.filename.clone() })?,
        (None, Some(text)) => text.clone().into_bytes(),
        (None, None) => return Err(ServiceError::DecodeFailed { filename: item.filename }),
    };

    if bytes.len() as u64 > config.upload_max_bytes() {
        return Err(ServiceError::UploadTooLarge {
            filename: item.filename,
            limit: config.upload_max_bytes(),
        })
    }

    if let Some(declared) = item.size {
        if declared != bytes.len() as u64 {
            log::debug!("Upload {} declared {} bytes but carried {}", item.filename, declared, bytes.len());
        }
    }

    if let Some(mime_type) = &item.mime_type {
        log::debug!("Upload {} declares mime type {}", item.filename, mime_type);
    }

    let basename = sanitize(&item.filename);

    let destination = match config.date_partition_uploads() {
        true => {
            let today = Utc::now();
            config.uploads_dir()
                .join(format!("{:04}", today.year()))
                .join(format!("{:02}", today.month()))
                .join(format!("{:02}", today.day()))
                .join(basename)
        },
        false => {
            let prefix = Uuid::new_v4().simple().to_string();
            config.uploads_dir().join(format!("{}_{}", &prefix[..8], basename))
        },
    };

    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&destination, &bytes)?;
    log::info!("Stored upload {} ({} bytes)", destination.to_string_lossy(), bytes.len());

    Ok(destination)
}

///
/// Reduce a client-supplied filename to a safe basename: path components are
/// stripped and anything outside [A-Za-z0-9._-] becomes an underscore.
///
fn sanitize(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let cleaned: String = basename.chars()
        .map(|ch| match ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            true => ch,
            false => '_',
        })
        .collect();

    let trimmed = cleaned.trim_matches('.').to_string();
    match trimmed.is_empty() {
        true => "file".into(),
        false => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn test_config(dir: &Path, extra: &str) -> Config {
        let yaml = format!("uploads_dir: {}\n{}", dir.join("uploads").to_string_lossy(), extra);
        let path = dir.join("upload_config.yaml");
        std::fs::write(&path, yaml).unwrap();
        Config::load(Some(&path)).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn item(filename: &str, data: Option<&str>, base64: Option<&str>) -> UploadItem {
        UploadItem {
            filename: filename.into(),
            data: data.map(str::to_string),
            base64: base64.map(str::to_string),
            size: None,
            mime_type: None,
            related_id: None,
        }
    }

    #[test]
    fn stores_raw_and_base64_payloads() {
        let dir = temp_dir("opentally_upload_payloads");
        let config = test_config(&dir, "");

        let outcomes = store_all(&config, vec!(
            item("plain.csv", Some("id,amt\nA,1\n"), None),
            item("encoded.csv", None, Some(&STANDARD.encode("id,amt\nB,2\n"))),
        ));

        assert!(outcomes.iter().all(|outcome| !outcome.is_err()));

        let stored = std::fs::read_to_string(outcomes[1].path().unwrap()).unwrap();
        assert_eq!(stored, "id,amt\nB,2\n");
    }

    #[test]
    fn prefixes_keep_same_named_uploads_apart() {
        let dir = temp_dir("opentally_upload_prefix");
        let config = test_config(&dir, "");

        let outcomes = store_all(&config, vec!(
            item("ledger.csv", Some("a"), None),
            item("ledger.csv", Some("b"), None),
        ));

        assert_ne!(outcomes[0].path().unwrap(), outcomes[1].path().unwrap());
    }

    #[test]
    fn path_traversal_is_neutralised() {
        let dir = temp_dir("opentally_upload_traversal");
        let config = test_config(&dir, "");

        let outcomes = store_all(&config, vec!(item("../../etc/cron.csv", Some("x"), None)));

        let path = PathBuf::from(outcomes[0].path().unwrap());
        assert!(path.starts_with(dir.join("uploads")));
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("cron.csv"));
    }

    #[test]
    fn disallowed_extension_is_rejected() {
        let dir = temp_dir("opentally_upload_ext");
        let config = test_config(&dir, "");

        let outcomes = store_all(&config, vec!(item("malware.exe", Some("x"), None)));
        assert!(outcomes[0].is_err());
    }

    #[test]
    fn bad_base64_fails_only_its_item() {
        let dir = temp_dir("opentally_upload_bad64");
        let config = test_config(&dir, "");

        let outcomes = store_all(&config, vec!(
            item("broken.csv", None, Some("!!! not base64 !!!")),
            item("fine.csv", Some("ok"), None),
        ));

        assert!(outcomes[0].is_err());
        assert!(!outcomes[1].is_err());
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let dir = temp_dir("opentally_upload_size");
        let config = test_config(&dir, "upload_max_bytes: 4\n");

        let outcomes = store_all(&config, vec!(item("big.csv", Some("four and more"), None)));
        assert!(outcomes[0].is_err());
    }

    #[test]
    fn date_partitioning_builds_a_dated_path() {
        let dir = temp_dir("opentally_upload_dated");
        let config = test_config(&dir, "date_partition_uploads: true\n");

        let outcomes = store_all(&config, vec!(item("daily.csv", Some("x"), None)));

        let today = Utc::now();
        let expected = dir.join("uploads")
            .join(format!("{:04}", today.year()))
            .join(format!("{:02}", today.month()))
            .join(format!("{:02}", today.day()))
            .join("daily.csv");

        assert_eq!(PathBuf::from(outcomes[0].path().unwrap()), expected);
    }

    #[test]
    fn filenames_sanitise_to_safe_basenames() {
        assert_eq!(sanitize("report (final).csv"), "report__final_.csv");
        assert_eq!(sanitize("..\\..\\win.csv"), "win.csv");
        assert_eq!(sanitize("..."), "file");
        assert_eq!(sanitize("对账.csv"), "__.csv");
    }
}
