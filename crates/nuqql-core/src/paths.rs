use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInputs {
    pub home_dir: PathBuf,
    pub xdg_config_home: Option<PathBuf>,
    pub nuqql_dir_override: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NuqqlPaths {
    pub nuqql_dir: PathBuf,

    pub log_path: PathBuf,
    pub logs_dir: PathBuf,
    pub backends_dir: PathBuf,
    pub global_status_file: PathBuf,

    pub config_dir: PathBuf,
    pub config_file: PathBuf,
}

pub fn compute_paths(inputs: PathInputs) -> NuqqlPaths {
    let nuqql_dir = inputs
        .nuqql_dir_override
        .clone()
        .unwrap_or_else(|| inputs.home_dir.join(".nuqql"));

    let config_base = match inputs.nuqql_dir_override {
        Some(ref override_dir) => override_dir.join("config"),
        None => inputs
            .xdg_config_home
            .unwrap_or_else(|| inputs.home_dir.join(".config"))
            .join("nuqql"),
    };

    NuqqlPaths {
        log_path: nuqql_dir.join("nuqql.log"),
        logs_dir: nuqql_dir.join("logs"),
        backends_dir: nuqql_dir.join("backends"),
        global_status_file: nuqql_dir.join("global_status"),

        config_file: config_base.join("config.toml"),

        nuqql_dir,
        config_dir: config_base,
    }
}

impl NuqqlPaths {
    /// Working directory handed to a backend subprocess.
    pub fn backend_dir(&self, backend: &str) -> PathBuf {
        self.backends_dir.join(backend)
    }

    /// Socket the backend is asked to create inside its working directory.
    pub fn backend_socket(&self, backend: &str) -> PathBuf {
        self.backend_dir(backend).join(format!("{backend}.sock"))
    }

    /// Directory holding one conversation's `history` and `lastread` files,
    /// namespaced by backend name, account id, and conversation name.
    pub fn conversation_dir(&self, backend: &str, account_id: &str, conversation: &str) -> PathBuf {
        self.logs_dir
            .join(sanitize_segment(backend))
            .join(sanitize_segment(account_id))
            .join(sanitize_segment(conversation))
    }
}

/// Conversation and account names come off the wire; anything that is not
/// filesystem-safe is replaced before the name becomes a path segment.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_owned()
    } else {
        cleaned
    }
}

#[derive(Debug, Error)]
pub enum SafeJoinError {
    #[error("path segment is empty")]
    Empty,
    #[error("path segment is not a normal component: {segment:?}")]
    NotNormal { segment: String },
}

pub fn safe_join(base: &Path, segment: &str) -> Result<PathBuf, SafeJoinError> {
    let segment = segment.trim();
    if segment.is_empty() {
        return Err(SafeJoinError::Empty);
    }

    let segment_path = Path::new(segment);
    if segment_path.is_absolute() {
        return Err(SafeJoinError::NotNormal {
            segment: segment.to_owned(),
        });
    }

    let mut components = segment_path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        (Some(std::path::Component::Normal(_)), None) => Ok(base.join(segment)),
        _ => Err(SafeJoinError::NotNormal {
            segment: segment.to_owned(),
        }),
    }
}
