use crate::infrastructure::config::{read_selected_app_ids, save_selected_app_ids};
use crate::infrastructure::error::InfraError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Source of the package/app identifiers the user wants blocked.
pub trait SelectedAppsStore: Send + Sync {
    fn selected_app_ids(&self) -> Result<Vec<String>, InfraError>;
    fn save_selected_app_ids(&self, app_ids: &[String]) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct JsonSelectedAppsStore {
    config_dir: PathBuf,
}

impl JsonSelectedAppsStore {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
        }
    }
}

impl SelectedAppsStore for JsonSelectedAppsStore {
    fn selected_app_ids(&self) -> Result<Vec<String>, InfraError> {
        read_selected_app_ids(&self.config_dir)
    }

    fn save_selected_app_ids(&self, app_ids: &[String]) -> Result<(), InfraError> {
        save_selected_app_ids(&self.config_dir, app_ids)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySelectedAppsStore {
    app_ids: Mutex<Vec<String>>,
}

impl InMemorySelectedAppsStore {
    pub fn with_app_ids(app_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            app_ids: Mutex::new(app_ids.into_iter().map(Into::into).collect()),
        }
    }
}

impl SelectedAppsStore for InMemorySelectedAppsStore {
    fn selected_app_ids(&self) -> Result<Vec<String>, InfraError> {
        let app_ids = self
            .app_ids
            .lock()
            .map_err(|error| InfraError::poisoned("selected apps", error))?;
        Ok(app_ids.clone())
    }

    fn save_selected_app_ids(&self, app_ids: &[String]) -> Result<(), InfraError> {
        let mut stored = self
            .app_ids
            .lock()
            .map_err(|error| InfraError::poisoned("selected apps", error))?;
        *stored = app_ids
            .iter()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        Ok(())
    }
}
