use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-school engines. Each school gets its own Engine + WAL +
/// background compactor. School = database name from the pgwire connection.
pub struct SchoolDirectory {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl SchoolDirectory {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create an engine for the given school.
    pub fn get_or_create(&self, school: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(school) {
            return Ok(engine.value().clone());
        }
        if school.len() > MAX_SCHOOL_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "school name too long",
            ));
        }
        if self.engines.len() >= MAX_SCHOOLS {
            return Err(std::io::Error::other("too many schools"));
        }

        // Sanitize school name to prevent path traversal
        let safe_name: String = school
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty school name",
            ));
        }

        let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(wal_path, notify)?);

        // Spawn the WAL compactor for this school
        let compactor_engine = engine.clone();
        let threshold = self.compact_threshold;
        tokio::spawn(async move {
            compactor::run_compactor(compactor_engine, threshold).await;
        });

        self.engines.insert(school.to_string(), engine.clone());
        metrics::gauge!(crate::observability::SCHOOLS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Caller, Role};
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("drivebook_test_school").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn staff() -> Caller {
        Caller { id: Ulid::new(), role: Role::Staff }
    }

    #[tokio::test]
    async fn school_isolation() {
        let dir = test_data_dir("isolation");
        let directory = SchoolDirectory::new(dir, 1000);

        let eng_a = directory.get_or_create("school_a").unwrap();
        let eng_b = directory.get_or_create("school_b").unwrap();

        let iid = Ulid::new();

        // Register the same instructor id in both schools
        eng_a.register_instructor(&staff(), iid, None).await.unwrap();
        eng_b.register_instructor(&staff(), iid, None).await.unwrap();

        let next_week = chrono::Utc::now().date_naive() + chrono::Days::new(7);
        eng_a
            .add_availability(&staff(), Ulid::new(), iid, next_week, "09:00", "12:00")
            .await
            .unwrap();

        // School B's instructor has no availability
        let avail_b = eng_b.list_future_availability(iid).await.unwrap();
        assert!(avail_b.is_empty());

        let avail_a = eng_a.list_future_availability(iid).await.unwrap();
        assert_eq!(avail_a.len(), 1);
    }

    #[tokio::test]
    async fn school_lazy_creation() {
        let dir = test_data_dir("lazy");
        let directory = SchoolDirectory::new(dir.clone(), 1000);

        // No WAL files should exist yet
        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = directory.get_or_create("city_driving").unwrap();

        assert!(dir.join("city_driving.wal").exists());
    }

    #[tokio::test]
    async fn school_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let directory = SchoolDirectory::new(dir, 1000);

        let eng1 = directory.get_or_create("foo").unwrap();
        let eng2 = directory.get_or_create("foo").unwrap();

        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn school_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let directory = SchoolDirectory::new(dir.clone(), 1000);

        // Path traversal attempt
        let _eng = directory.get_or_create("../evil").unwrap();
        // Should create "evil.wal", not "../evil.wal"
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = directory.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn school_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let directory = SchoolDirectory::new(dir, 1000);

        let long_name = "x".repeat(MAX_SCHOOL_NAME_LEN + 1);
        let result = directory.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("school name too long"));
    }

    #[tokio::test]
    async fn school_count_limit() {
        let dir = test_data_dir("count_limit");
        let directory = SchoolDirectory::new(dir, 1000);

        for i in 0..MAX_SCHOOLS {
            directory.get_or_create(&format!("s{i}")).unwrap();
        }
        let result = directory.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many schools"));
    }
}
