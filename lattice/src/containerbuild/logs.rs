//! Retained container build logs

use std::collections::HashMap;
use std::sync::RwLock;

struct BuildLogEntry {
    lines: Vec<String>,
    updated_at: u64,
}

/// In-memory log buffer per container build, evicting the least recently written build
pub struct BuildLogs {
    entries: RwLock<HashMap<String, BuildLogEntry>>,
    capacity: usize,
}

impl Default for BuildLogs {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BuildLogs {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append output to a build's log
    pub fn append(&self, id: &str, text: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(id) && entries.len() >= self.capacity {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.updated_at)
                .map(|(id, _)| id.clone())
            {
                entries.remove(&oldest);
            }
        }

        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let entry = entries.entry(id.to_string()).or_insert_with(|| BuildLogEntry {
            lines: Vec::new(),
            updated_at: now,
        });
        entry
            .lines
            .extend(text.lines().map(str::to_string));
        entry.updated_at = now;
    }

    /// Full log of a build, if retained
    pub fn get(&self, id: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(id).map(|entry| entry.lines.join("\n"))
    }

    pub fn remove(&self, id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_get() {
        let logs = BuildLogs::default();
        logs.append("a", "cloning\n");
        logs.append("a", "step 1\nstep 2");
        assert_eq!(logs.get("a").unwrap(), "cloning\nstep 1\nstep 2");
        assert!(logs.get("b").is_none());
    }

    #[test]
    fn test_eviction() {
        let logs = BuildLogs::new(2);
        logs.append("a", "1");
        std::thread::sleep(std::time::Duration::from_millis(2));
        logs.append("b", "2");
        std::thread::sleep(std::time::Duration::from_millis(2));
        logs.append("c", "3");
        assert!(logs.get("a").is_none());
        assert!(logs.get("b").is_some());
        assert!(logs.get("c").is_some());
    }
}
