//! Out-of-band process identity and the control-file poll.
//!
//! Which role id a process claims and where the registry lives are
//! deployment concerns, handed to each process through the environment.

use crate::{EngineError, EngineResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ROLE_ID_ENV: &str = "TANDEM_ROLE_ID";
pub const REGISTRY_FILE_ENV: &str = "TANDEM_REGISTRY_FILE";

/// Conventional control-file name polled at stage selection.
pub const CONTROL_FILE: &str = "tandem.control";

/// Identity discovered from the environment.
#[derive(Clone, Debug)]
pub struct ProcessEnv {
    pub role_id: i64,
    pub registry_path: PathBuf,
}

impl ProcessEnv {
    pub fn discover() -> EngineResult<Self> {
        let role_id = std::env::var(ROLE_ID_ENV)
            .ok()
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| {
                EngineError::Parsing(format!("{} is unset or not an integer", ROLE_ID_ENV))
            })?;
        let registry_path = std::env::var_os(REGISTRY_FILE_ENV)
            .map(PathBuf::from)
            .ok_or_else(|| EngineError::Parsing(format!("{} is unset", REGISTRY_FILE_ENV)))?;
        Ok(Self {
            role_id,
            registry_path,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ControlFile {
    #[serde(default)]
    terminate: bool,
}

/// Poll a control file for an external terminate request. A missing or
/// malformed file reads as "keep going"; only the stage-selecting process
/// consults it.
pub fn control_terminate(path: &Path) -> bool {
    let Ok(text) = std::fs::read_to_string(path) else {
        return false;
    };
    serde_json::from_str::<ControlFile>(&text)
        .map(|control| control.terminate)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn control_file_states() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONTROL_FILE);

        assert!(!control_terminate(&path));

        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{{\"terminate\": false}}").unwrap();
        assert!(!control_terminate(&path));

        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{{\"terminate\": true}}").unwrap();
        assert!(control_terminate(&path));

        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "not json").unwrap();
        assert!(!control_terminate(&path));
    }

    #[test]
    fn discover_reads_the_environment() {
        std::env::set_var(ROLE_ID_ENV, "3");
        std::env::set_var(REGISTRY_FILE_ENV, "/tmp/registry.json");
        let env = ProcessEnv::discover().unwrap();
        assert_eq!(env.role_id, 3);
        assert_eq!(env.registry_path, PathBuf::from("/tmp/registry.json"));

        std::env::set_var(ROLE_ID_ENV, "not-a-number");
        assert!(ProcessEnv::discover().is_err());

        std::env::remove_var(ROLE_ID_ENV);
        std::env::remove_var(REGISTRY_FILE_ENV);
        assert!(ProcessEnv::discover().is_err());
    }
}
