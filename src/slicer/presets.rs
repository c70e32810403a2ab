// src/slicer/presets.rs - Directory-backed preset store
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{ConfigFiles, ImportedPresets, PresetError, PresetKind, PresetStore};

/// Presets stored as `<root>/<kind>/<name>.json`; the active selection is
/// written to `<root>/active.json`.
#[derive(Debug, Clone)]
pub struct DirectoryPresetStore {
    root: PathBuf,
}

impl DirectoryPresetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn preset_path(&self, kind: PresetKind, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        Some(self.root.join(kind.as_str()).join(format!("{name}.json")))
    }

    fn active_path(&self) -> PathBuf {
        self.root.join("active.json")
    }

    /// The active selection, if one has been applied.
    pub async fn active(&self) -> Result<Option<Value>, PresetError> {
        read_json(&self.active_path()).await
    }
}

async fn read_json(path: &Path) -> Result<Option<Value>, PresetError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl PresetStore for DirectoryPresetStore {
    async fn find(&self, kind: PresetKind, name: &str) -> Result<Option<Value>, PresetError> {
        match self.preset_path(kind, name) {
            Some(path) => read_json(&path).await,
            None => Ok(None),
        }
    }

    async fn import(&self, files: &ConfigFiles) -> Result<ImportedPresets, PresetError> {
        let mut imported = ImportedPresets::new();
        for kind in PresetKind::ALL {
            let source = files.get(&kind).ok_or(PresetError::Missing(kind))?;
            let contents = fs::read_to_string(source).await?;
            let value: Value = serde_json::from_str(&contents)?;
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| source.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .unwrap_or_else(|| kind.as_str().to_string());
            let target = self
                .preset_path(kind, &name)
                .ok_or_else(|| PresetError::Missing(kind))?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&target, contents).await?;
            tracing::info!("Imported {} preset '{}'", kind, name);
            imported.insert(kind, name);
        }
        Ok(imported)
    }

    async fn apply(&self, presets: &ImportedPresets) -> Result<(), PresetError> {
        fs::create_dir_all(&self.root).await?;
        let selection = serde_json::to_value(presets)?;
        fs::write(self.active_path(), serde_json::to_vec_pretty(&selection)?).await?;
        tracing::info!("Applied presets: {}", selection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_import_then_find_and_apply() {
        let dir = tempdir().unwrap();
        let downloads = dir.path().join("dl");
        std::fs::create_dir_all(&downloads).unwrap();
        let mut files = ConfigFiles::new();
        for kind in PresetKind::ALL {
            let path = downloads.join(format!("{kind}.json"));
            std::fs::write(&path, format!("{{\"name\":\"ptgo {kind}\",\"type\":\"{kind}\"}}")).unwrap();
            files.insert(kind, path);
        }

        let store = DirectoryPresetStore::new(dir.path().join("presets"));
        let imported = store.import(&files).await.unwrap();
        assert_eq!(imported[&PresetKind::Printer], "ptgo printer");

        let found = store.find(PresetKind::Filament, "ptgo filament").await.unwrap().unwrap();
        assert_eq!(found["type"], "filament");
        assert!(store.find(PresetKind::Print, "missing").await.unwrap().is_none());

        store.apply(&imported).await.unwrap();
        let active = store.active().await.unwrap().unwrap();
        assert_eq!(active["print"], "ptgo print");
    }

    #[tokio::test]
    async fn test_find_rejects_path_like_names() {
        let dir = tempdir().unwrap();
        let store = DirectoryPresetStore::new(dir.path());
        assert!(store.find(PresetKind::Printer, "../secrets").await.unwrap().is_none());
        assert!(store.find(PresetKind::Printer, "").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_requires_all_roles() {
        let dir = tempdir().unwrap();
        let store = DirectoryPresetStore::new(dir.path());
        let result = store.import(&ConfigFiles::new()).await;
        assert!(matches!(result, Err(PresetError::Missing(PresetKind::Printer))));
    }
}
