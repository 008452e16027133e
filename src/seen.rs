//! Durable record of lot identifiers that were already announced.
//!
//! The store is a JSON array of strings, rewritten through a temporary file
//! and a rename so a crash mid-write leaves the previous version intact.
//! Concurrent invocations sharing one file must be serialized by the caller.
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// Coerce an identifier to its canonical string form. Numbers and numeric
/// strings of the same value compare equal afterwards.
pub fn normalize_id(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_u64(), n.as_i64(), n.as_f64()) {
            (Some(u), _, _) => u.to_string(),
            (None, Some(i), _) => i.to_string(),
            (None, None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
                format!("{}", f as i64)
            }
            (None, None, Some(f)) => f.to_string(),
            _ => return None,
        },
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

/// Set of already-notified lot ids, kept sorted for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    ids: BTreeSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id.trim())
    }

    /// Record an id; returns false when it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    fn from_json(values: Vec<Value>) -> Self {
        Self {
            ids: values.iter().filter_map(normalize_id).collect(),
        }
    }
}

impl<S: AsRef<str>> FromIterator<S> for SeenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = SeenSet::new();
        for id in iter {
            set.insert(id.as_ref());
        }
        set
    }
}

/// Parse stored content. Besides the JSON array, a plain newline-separated
/// id list is accepted; `origin` names the source in errors and logs.
pub fn parse_ids(content: &str, origin: &str) -> Result<SeenSet, StoreError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(SeenSet::new());
    }
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed)?;
        return Ok(SeenSet::from_json(values));
    }
    if trimmed.starts_with('{') || trimmed.starts_with('"') {
        return Err(StoreError::Corrupt(format!("{origin} does not hold an id array")));
    }
    warn!(origin, "reading legacy line-based seen list");
    Ok(trimmed.lines().collect())
}

/// Sorted JSON array with a trailing newline.
pub fn render_ids(set: &SeenSet) -> Result<Vec<u8>, StoreError> {
    let ids: Vec<&str> = set.iter().collect();
    let mut bytes = serde_json::to_vec_pretty(&ids)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Where the seen set lives between runs.
#[async_trait]
pub trait SeenBackend: Send + Sync {
    /// False until the first save; drives first-run handling.
    async fn exists(&self) -> Result<bool, StoreError>;

    /// The stored set, or an empty one when nothing was saved yet.
    async fn load(&self) -> Result<SeenSet, StoreError>;

    /// Replace the stored set as a whole.
    async fn save(&self, set: &SeenSet) -> Result<(), StoreError>;

    /// Short description for logs.
    fn location(&self) -> String;
}

/// File-backed seen-set store.
#[derive(Debug, Clone)]
pub struct SeenStore {
    path: PathBuf,
}

impl SeenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Read the stored set; a missing file yields an empty set.
    pub async fn load(&self) -> Result<SeenSet, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "seen file not found, starting empty");
                return Ok(SeenSet::new());
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let set = parse_ids(&content, &self.path.display().to_string())?;
        info!(path = %self.path.display(), count = set.len(), "loaded seen set");
        Ok(set)
    }

    /// Persist the set: write a sibling temp file, flush it to disk, then
    /// rename over the target.
    pub async fn save(&self, set: &SeenSet) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = render_ids(set)?;

        let tmp = self.tmp_path();
        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Io(err));
        }

        debug!(path = %self.path.display(), count = set.len(), "saved seen set");
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "seen".into());
        self.path
            .with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl SeenBackend for SeenStore {
    async fn exists(&self) -> Result<bool, StoreError> {
        Ok(SeenStore::exists(self).await)
    }

    async fn load(&self) -> Result<SeenSet, StoreError> {
        SeenStore::load(self).await
    }

    async fn save(&self, set: &SeenSet) -> Result<(), StoreError> {
        SeenStore::save(self, set).await
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn normalize_handles_strings_and_numbers() {
        assert_eq!(normalize_id(&json!(" 123 ")).as_deref(), Some("123"));
        assert_eq!(normalize_id(&json!(123)).as_deref(), Some("123"));
        assert_eq!(normalize_id(&json!(-7)).as_deref(), Some("-7"));
        assert_eq!(normalize_id(&json!(123.0)).as_deref(), Some("123"));
        assert_eq!(normalize_id(&json!("")), None);
        assert_eq!(normalize_id(&json!(null)), None);
        assert_eq!(normalize_id(&json!(true)), None);
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let td = tempdir().unwrap();
        let store = SeenStore::new(td.path().join("seen.json"));
        assert!(!store.exists().await);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_keeps_membership() {
        let td = tempdir().unwrap();
        let store = SeenStore::new(td.path().join("nested").join("seen.json"));
        let set: SeenSet = ["b-2", "a-1", "c-3"].into_iter().collect();
        store.save(&set).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, set);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let ids: Vec<String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(ids, vec!["a-1", "b-2", "c-3"]);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let td = tempdir().unwrap();
        let store = SeenStore::new(td.path().join("seen.json"));
        store.save(&["x"].into_iter().collect()).await.unwrap();
        store.save(&["x", "y"].into_iter().collect()).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(td.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["seen.json"]);
    }

    #[tokio::test]
    async fn numeric_ids_in_file_are_normalized() {
        let td = tempdir().unwrap();
        let path = td.path().join("seen.json");
        std::fs::write(&path, r#"[101, "102", " 103 "]"#).unwrap();
        let set = SeenStore::new(&path).load().await.unwrap();
        assert!(set.contains("101"));
        assert!(set.contains("102"));
        assert!(set.contains("103"));
    }

    #[tokio::test]
    async fn legacy_line_format_is_read() {
        let td = tempdir().unwrap();
        let path = td.path().join("seen.json");
        std::fs::write(&path, "abc\n\ndef\n").unwrap();
        let set = SeenStore::new(&path).load().await.unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["abc", "def"]);
    }

    #[tokio::test]
    async fn object_payload_is_rejected() {
        let td = tempdir().unwrap();
        let path = td.path().join("seen.json");
        std::fs::write(&path, r#"{"ids": []}"#).unwrap();
        assert!(matches!(
            SeenStore::new(&path).load().await,
            Err(StoreError::Corrupt(_))
        ));
    }
}
