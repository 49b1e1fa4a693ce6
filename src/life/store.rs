use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// The persisted outfit + schedule record for one calendar date.
///
/// At most one record exists per date; regeneration overwrites in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyState {
    pub date: NaiveDate,
    pub outfit: String,
    pub schedule: String,
    pub generated_at: DateTime<Local>,
    /// Set when the record came from a manual regeneration; a manual
    /// record stays fresh for the rest of its day.
    #[serde(default)]
    pub manual: bool,
}

/// Keyed record store (date -> DailyState), persisted as a single JSON file.
pub struct DailyStore {
    path: PathBuf,
    records: Mutex<HashMap<NaiveDate, DailyState>>,
}

impl DailyStore {
    /// Open the store. A missing file is an empty store; a corrupt file is
    /// discarded with a warning and overwritten on the next write.
    pub fn new(path: PathBuf) -> Self {
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!("Discarding corrupt daily state file {}: {e}", path.display());
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    pub fn get(&self, date: NaiveDate) -> Option<DailyState> {
        self.records
            .lock()
            .expect("daily store lock poisoned")
            .get(&date)
            .cloned()
    }

    pub fn put(&self, state: DailyState) -> Result<()> {
        let mut records = self.records.lock().expect("daily store lock poisoned");
        records.insert(state.date, state);
        self.save(&records)
    }

    /// The `days` most recent records strictly before `date`, oldest first.
    pub fn history_before(&self, date: NaiveDate, days: u32) -> Vec<DailyState> {
        let records = self.records.lock().expect("daily store lock poisoned");
        let mut history: Vec<DailyState> = (1..=u64::from(days))
            .filter_map(|i| date.checked_sub_days(Days::new(i)))
            .filter_map(|d| records.get(&d).cloned())
            .collect();
        history.sort_by_key(|s| s.date);
        history
    }

    fn save(&self, records: &HashMap<NaiveDate, DailyState>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write daily state: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(date: NaiveDate, outfit: &str) -> DailyState {
        DailyState {
            date,
            outfit: outfit.to_string(),
            schedule: "a quiet day".to_string(),
            generated_at: Local::now(),
            manual: false,
        }
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_put_get_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = DailyStore::new(dir.path().join("daily_state.json"));
        let d = day("2026-08-07");

        assert!(store.get(d).is_none());
        store.put(state(d, "linen shirt")).unwrap();
        assert_eq!(store.get(d).unwrap().outfit, "linen shirt");

        store.put(state(d, "rain jacket")).unwrap();
        assert_eq!(store.get(d).unwrap().outfit, "rain jacket");
    }

    #[test]
    fn test_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily_state.json");
        DailyStore::new(path.clone())
            .put(state(day("2026-08-07"), "linen shirt"))
            .unwrap();

        let store = DailyStore::new(path);
        assert_eq!(store.get(day("2026-08-07")).unwrap().outfit, "linen shirt");
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daily_state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = DailyStore::new(path);
        assert!(store.get(day("2026-08-07")).is_none());
    }

    #[test]
    fn test_history_before_caps_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        let store = DailyStore::new(dir.path().join("daily_state.json"));
        for d in ["2026-08-01", "2026-08-03", "2026-08-05", "2026-08-06"] {
            store.put(state(day(d), d)).unwrap();
        }

        let history = store.history_before(day("2026-08-07"), 3);
        let dates: Vec<_> = history.iter().map(|s| s.date.to_string()).collect();
        // 3-day window covers 08-04..08-06; today itself is excluded
        assert_eq!(dates, ["2026-08-05", "2026-08-06"]);

        let history = store.history_before(day("2026-08-07"), 7);
        assert_eq!(history.len(), 4);
        assert_eq!(history.first().unwrap().date, day("2026-08-01"));
    }

    #[test]
    fn test_history_with_single_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = DailyStore::new(dir.path().join("daily_state.json"));
        store.put(state(day("2026-08-06"), "cardigan")).unwrap();

        let history = store.history_before(day("2026-08-07"), 7);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outfit, "cardigan");
    }
}
