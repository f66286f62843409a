//! In-memory intent log.
//!
//! Every submitted directive is kept with its parsed form, the generated
//! policies and the per-policy enforcement results, serving the list/get
//! API and the active-intent gauge.

use chrono::{DateTime, Utc};
use imperium_core::{EnforcementResult, ParsedIntent, Policy};
use imperium_monitoring::IntentSource;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize)]
pub struct IntentRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub parsed: ParsedIntent,
    pub policies: Vec<Policy>,
    pub results: Vec<EnforcementResult>,
    pub status: String,
}

#[derive(Default)]
pub struct IntentLog {
    records: RwLock<Vec<IntentRecord>>,
    counter: AtomicU64,
}

impl IntentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("intent-{}-{}", n, Utc::now().timestamp())
    }

    pub fn push(&self, record: IntentRecord) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).push(record);
    }

    pub fn get(&self, id: &str) -> Option<IntentRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn list(&self) -> Vec<IntentRecord> {
        self.records.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every policy generated so far, in submission order.
    pub fn policies(&self) -> Vec<Policy> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .flat_map(|r| r.policies.clone())
            .collect()
    }
}

impl IntentSource for IntentLog {
    fn active_intents(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.status == "active")
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imperium_core::IntentType;
    use std::collections::HashMap;

    fn record(log: &IntentLog, status: &str) -> IntentRecord {
        IntentRecord {
            id: log.next_id(),
            timestamp: Utc::now(),
            description: "set qos level 2 for node-1".to_string(),
            parsed: ParsedIntent {
                original: "set qos level 2 for node-1".to_string(),
                intent_type: IntentType::Qos,
                parameters: HashMap::new(),
            },
            policies: Vec::new(),
            results: Vec::new(),
            status: status.to_string(),
        }
    }

    #[test]
    fn ids_are_sequential_and_unique() {
        let log = IntentLog::new();
        let a = log.next_id();
        let b = log.next_id();
        assert!(a.starts_with("intent-1-"));
        assert!(b.starts_with("intent-2-"));
        assert_ne!(a, b);
    }

    #[test]
    fn get_and_list() {
        let log = IntentLog::new();
        let rec = record(&log, "active");
        let id = rec.id.clone();
        log.push(rec);
        assert!(log.get(&id).is_some());
        assert!(log.get("intent-99-0").is_none());
        assert_eq!(log.list().len(), 1);
    }

    #[test]
    fn active_count_ignores_invalid_intents() {
        let log = IntentLog::new();
        log.push(record(&log, "active"));
        log.push(record(&log, "invalid"));
        log.push(record(&log, "active"));
        assert_eq!(log.active_intents(), 2);
    }
}
