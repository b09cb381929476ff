//! Filesystem layout helpers and atomic write operations
//!
//! Manages the .verbrun/ directory structure (config plus one JSON file per
//! save slot) and ensures atomic writes via temp files and renames.

use anyhow::{Context, Result, bail};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::EngineConfig;
use super::snapshot::SaveGame;

/// Storage manager for engine persistence
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Create a new storage manager
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the config file path
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Get the save slot directory path
    pub fn saves_dir(&self) -> PathBuf {
        self.root.join("saves")
    }

    /// Get the file path of a save slot
    pub fn slot_path(&self, slot: &str) -> PathBuf {
        self.saves_dir().join(format!("{slot}.json"))
    }

    /// Write data atomically to a file
    ///
    /// Creates a temporary file, writes the data, syncs, then renames
    pub fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;

        file.write_all(data).context("Failed to write data")?;

        file.sync_all().context("Failed to sync file")?;

        drop(file);

        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

        // Sync parent directory
        if let Some(parent) = path.parent() {
            let dir = OpenOptions::new()
                .read(true)
                .open(parent)
                .with_context(|| format!("Failed to open directory: {:?}", parent))?;

            dir.sync_all().context("Failed to sync directory")?;
        }

        Ok(())
    }

    /// Read a file
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("Failed to read file: {:?}", path))
    }

    /// Create a directory and all parent directories
    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {:?}", path))
    }

    /// List files in a directory
    pub fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();

        for entry in
            fs::read_dir(path).with_context(|| format!("Failed to read directory: {:?}", path))?
        {
            let entry = entry?;
            entries.push(entry.path());
        }

        Ok(entries)
    }
}

/// Initialize storage directories for a new engine root
pub fn init_storage(root: &Path) -> Result<()> {
    let storage = Storage::new(root.to_path_buf());

    storage.create_dir_all(root)?;
    storage.create_dir_all(&storage.saves_dir())?;

    Ok(())
}

/// Write engine configuration
pub fn write_config(config: &EngineConfig) -> Result<()> {
    let storage = Storage::new(config.root.clone());
    let config_path = storage.config_path();

    let json = serde_json::to_vec_pretty(config).context("Failed to serialize config")?;

    storage.write_atomic(&config_path, &json)?;

    Ok(())
}

/// Load engine configuration
pub fn load_config(root: &Path) -> Result<EngineConfig> {
    let storage = Storage::new(root.to_path_buf());
    let config_path = storage.config_path();

    let data = storage.read_file(&config_path)?;
    let config: EngineConfig =
        serde_json::from_slice(&data).context("Failed to deserialize config")?;

    Ok(config)
}

/// Named save slots under `<root>/saves/`
#[derive(Debug, Clone)]
pub struct SaveStore {
    storage: Storage,
}

impl SaveStore {
    /// Open the slot store of a storage root, creating the directory if needed
    pub fn open(root: &Path) -> Result<Self> {
        let storage = Storage::new(root.to_path_buf());
        storage.create_dir_all(&storage.saves_dir())?;
        Ok(Self { storage })
    }

    /// Write a save to a slot, replacing any previous contents
    pub fn save(&self, slot: &str, save: &SaveGame) -> Result<PathBuf> {
        check_slot(slot)?;
        let path = self.storage.slot_path(slot);
        let json = serde_json::to_vec_pretty(save).context("Failed to serialize save")?;
        self.storage.write_atomic(&path, &json)?;
        tracing::debug!(slot, save_id = %save.metadata.save_id, "save written");
        Ok(path)
    }

    /// Read the save in a slot
    pub fn load(&self, slot: &str) -> Result<SaveGame> {
        check_slot(slot)?;
        let data = self.storage.read_file(&self.storage.slot_path(slot))?;
        let save = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to deserialize save slot '{slot}'"))?;
        Ok(save)
    }

    /// Slot names, sorted
    pub fn list_slots(&self) -> Result<Vec<String>> {
        let mut slots: Vec<String> = self
            .storage
            .list_dir(&self.storage.saves_dir())?
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_string)
            })
            .collect();
        slots.sort();
        Ok(slots)
    }

    /// Delete a slot. Returns `false` if it did not exist.
    pub fn remove(&self, slot: &str) -> Result<bool> {
        check_slot(slot)?;
        let path = self.storage.slot_path(slot);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove save: {:?}", path))?;
        Ok(true)
    }
}

fn check_slot(slot: &str) -> Result<()> {
    let valid = !slot.is_empty()
        && slot
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        bail!("Invalid save slot name '{slot}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_storage() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("state");

        init_storage(&root).unwrap();

        assert!(root.exists());
        assert!(root.join("saves").exists());
    }

    #[test]
    fn test_write_and_read_config() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        init_storage(&root).unwrap();

        let config = EngineConfig {
            root: root.clone(),
            max_actions_per_step: 250,
            max_verb_depth: 3,
            rng_seed: 99,
            strict_fingerprint: true,
            validate_blocks: false,
        };

        write_config(&config).unwrap();
        let loaded = load_config(&root).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_atomic_write() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().to_path_buf());
        let test_file = temp.path().join("test.dat");

        let data = b"Hello, world!";
        storage.write_atomic(&test_file, data).unwrap();

        let read_data = storage.read_file(&test_file).unwrap();
        assert_eq!(data, &read_data[..]);
        assert!(!temp.path().join("test.tmp").exists());
    }

    #[test]
    fn test_slot_names_are_checked() {
        let temp = TempDir::new().unwrap();
        let store = SaveStore::open(temp.path()).unwrap();

        assert!(store.load("../escape").is_err());
        assert!(store.remove("").is_err());
        assert!(!store.remove("missing").unwrap());
        assert!(store.list_slots().unwrap().is_empty());
    }
}
