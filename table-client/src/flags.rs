// table-client/src/flags.rs
// 本地标记存储 - 内存 / JSON 文件

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::ClientResult;

/// 持久化键值存储 (替代浏览器 localStorage)
pub trait FlagStore: Send + Sync + Debug {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> ClientResult<()>;
    fn remove(&self, key: &str) -> ClientResult<()>;

    /// 读取布尔标记, 缺失视为 false
    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| v == "true")
    }
}

/// 内存存储 (测试用)
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.values().remove(key);
        Ok(())
    }
}

/// JSON 文件存储
///
/// 每次写入整文件重写; 文件不存在或损坏时视为空。
#[derive(Debug)]
pub struct FileFlagStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileFlagStore {
    /// 创建文件存储
    pub fn new(base_path: impl Into<PathBuf>, filename: &str) -> Self {
        Self {
            path: base_path.into().join(filename),
            lock: Mutex::new(()),
        }
    }

    /// 获取路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        let Ok(json) = fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        serde_json::from_str(&json).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), "Ignoring corrupt flag file: {}", e);
            BTreeMap::new()
        })
    }

    fn save(&self, values: &BTreeMap<String, String>) -> ClientResult<()> {
        // 确保目录存在
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> ClientResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut values = self.load();
        apply(&mut values);
        self.save(&values)
    }
}

impl FlagStore for FileFlagStore {
    fn get(&self, key: &str) -> Option<String> {
        self.load().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> ClientResult<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store() {
        let store = MemoryFlagStore::new();
        assert!(!store.flag("visited"));
        store.set("visited", "true").unwrap();
        assert!(store.flag("visited"));
        store.remove("visited").unwrap();
        assert_eq!(store.get("visited"), None);
    }

    #[test]
    fn test_file_store_persists() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileFlagStore::new(temp_dir.path().join("nested"), "flags.json");
        store.set("visited", "true").unwrap();
        assert!(store.path().exists());

        let reopened = FileFlagStore::new(temp_dir.path().join("nested"), "flags.json");
        assert!(reopened.flag("visited"));

        reopened.remove("visited").unwrap();
        assert!(!store.flag("visited"));
    }

    #[test]
    fn test_file_store_corrupt_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileFlagStore::new(temp_dir.path(), "flags.json");
        fs::write(store.path(), "not json").unwrap();
        assert_eq!(store.get("visited"), None);
        store.set("visited", "true").unwrap();
        assert!(store.flag("visited"));
    }
}
