use crate::errors::StoreError;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Synchronous string key-value store holding JSON documents.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
}

/// One `<key>.json` file per document inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let io_err = |source: std::io::Error| StoreError::Io {
            key: key.to_string(),
            source,
        };
        fs::write(&tmp, value).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)?;
        debug!(key, "document written");
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Reads and parses a document. A document that no longer parses is logged
/// and reported as absent so the caller re-initialises it.
pub fn load_document<T, S>(store: &S, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(document) => Ok(Some(document)),
        Err(err) => {
            warn!(key, "discarding malformed document: {err}");
            Ok(None)
        }
    }
}

/// Parses a JSON array element by element, skipping (and logging) elements
/// that do not fit `T`. An unreadable document yields an empty list.
pub fn load_entries<T, S>(store: &S, key: &str) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    let raw: Vec<Value> = load_document(store, key)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(position, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key, position, "skipping unreadable entry: {err}");
                None
            }
        })
        .collect())
}

/// Map counterpart of [`load_entries`]: unreadable values are skipped per key.
pub fn load_entry_map<T, S>(store: &S, key: &str) -> Result<BTreeMap<String, T>, StoreError>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    let raw: Map<String, Value> = load_document(store, key)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(entry_key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((entry_key, entry)),
            Err(err) => {
                warn!(key, entry = %entry_key, "skipping unreadable entry: {err}");
                None
            }
        })
        .collect())
}

/// Raw array for documents owned by other writers. Entries are kept verbatim;
/// a document that exists but is not an array is an error rather than
/// something to overwrite.
pub fn load_foreign_list<S>(store: &S, key: &str) -> Result<Vec<Value>, StoreError>
where
    S: KeyValueStore + ?Sized,
{
    let Some(raw) = store.get(key)? else {
        return Ok(Vec::new());
    };
    match serde_json::from_str(&raw) {
        Ok(Value::Array(entries)) => Ok(entries),
        _ => Err(StoreError::Malformed {
            key: key.to_string(),
            expected: "a JSON array",
        }),
    }
}

pub fn encode_value<T>(key: &str, document: &T) -> Result<Value, StoreError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_value(document).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })
}

pub fn save_document<T, S>(store: &mut S, key: &str, document: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let payload = serde_json::to_string(document).map_err(|source| StoreError::Serialize {
        key: key.to_string(),
        source,
    })?;
    store.set(key, payload)
}
