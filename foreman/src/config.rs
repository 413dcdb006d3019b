use serde::Deserialize;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use crate::error::ServiceError;

///
/// Process-level configuration. Every key has a default so the service runs with no
/// config file at all; a YAML file named on the command line overrides the defaults.
///
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    max_concurrent_tasks: usize,
    task_timeout_seconds: u64,
    upload_max_bytes: u64,
    allowed_extensions: Vec<String>,
    listen_host: String,
    listen_port: u16,
    uploads_dir: PathBuf,
    results_dir: PathBuf,
    date_partition_uploads: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            task_timeout_seconds: 3600,
            upload_max_bytes: 100 * 1024 * 1024,
            allowed_extensions: vec!(".csv".into(), ".xlsx".into(), ".xls".into()),
            listen_host: "127.0.0.1".into(),
            listen_port: 8077,
            uploads_dir: PathBuf::from("./uploads"),
            results_dir: PathBuf::from("./results"),
            date_partition_uploads: false,
        }
    }
}

impl Config {
    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks.max(1)
    }

    pub fn task_timeout_seconds(&self) -> u64 {
        self.task_timeout_seconds
    }

    pub fn upload_max_bytes(&self) -> u64 {
        self.upload_max_bytes
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn listen_host(&self) -> &str {
        &self.listen_host
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    pub fn date_partition_uploads(&self) -> bool {
        self.date_partition_uploads
    }

    ///
    /// Load configuration from a YAML file, or fall back to defaults when no path is
    /// given.
    ///
    pub fn load(path: Option<&Path>) -> Result<Self, ServiceError> {
        let path = match path {
            Some(path) => path,
            None => return Ok(Self::default()),
        };

        let rdr = BufReader::new(std::fs::File::open(path)
            .map_err(|source| ServiceError::ConfigNotFound { path: path.to_string_lossy().into(), source })?);

        serde_yaml::from_reader(rdr)
            .map_err(|source| ServiceError::ConfigInvalid { path: path.to_string_lossy().into(), source })
    }

    ///
    /// Is the file's extension in the whitelist? Comparison is case-insensitive and
    /// tolerant of entries declared with or without the leading dot.
    ///
    pub fn extension_allowed(&self, filename: &str) -> bool {
        let lowered = filename.to_lowercase();
        self.allowed_extensions.iter().any(|allowed| {
            let allowed = allowed.to_lowercase();
            match allowed.starts_with('.') {
                true  => lowered.ends_with(&allowed),
                false => lowered.ends_with(&format!(".{}", allowed)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_tasks(), 5);
        assert_eq!(config.task_timeout_seconds(), 3600);
        assert_eq!(config.upload_max_bytes(), 104857600);
        assert_eq!(config.listen_port(), 8077);
        assert!(!config.date_partition_uploads());
    }

    #[test]
    fn extension_whitelist_is_case_insensitive() {
        let config = Config::default();
        assert!(config.extension_allowed("data.csv"));
        assert!(config.extension_allowed("DATA.XLSX"));
        assert!(config.extension_allowed("ledger.xls"));
        assert!(!config.extension_allowed("script.sh"));
        assert!(!config.extension_allowed("csv")); // No extension at all.
    }

    #[test]
    fn partial_config_files_keep_defaults_for_the_rest() {
        let dir = std::env::temp_dir().join("opentally_config_tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.yaml");
        std::fs::write(&path, "max_concurrent_tasks: 2\nlisten_port: 9000\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.max_concurrent_tasks(), 2);
        assert_eq!(config.listen_port(), 9000);
        assert_eq!(config.task_timeout_seconds(), 3600);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(matches!(
            Config::load(Some(Path::new("/nonexistent/foreman.yaml"))),
            Err(ServiceError::ConfigNotFound { .. })
        ));
    }
}
