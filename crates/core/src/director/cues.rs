use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{program::ProgramName, store::KeyValueStore, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CueAction {
    #[serde(rename = "switchScene")]
    SwitchScene,
}

/// Authored instruction to switch scenes when the bar clock reaches `bar`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    pub bar: u32,
    pub action: CueAction,
    pub scene: ProgramName,
}

impl Cue {
    pub fn switch_scene(bar: u32, scene: ProgramName) -> Self {
        Self {
            bar,
            action: CueAction::SwitchScene,
            scene,
        }
    }
}

/// Per-track cue lists kept under `cues:<track id>` as a JSON array ordered
/// by bar.
#[derive(Clone)]
pub struct CueStore {
    store: Rc<dyn KeyValueStore>,
}

impl CueStore {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn key(track_id: &str) -> String {
        format!("cues:{track_id}")
    }

    /// Loads the cue list for a track. Entries that do not describe a valid
    /// cue are skipped.
    pub fn load(&self, track_id: &str) -> Result<Vec<Cue>> {
        let Some(raw) = self.store.get(&Self::key(track_id))? else {
            return Ok(Vec::new());
        };

        let entries = match serde_json::from_str::<Value>(&raw)? {
            Value::Array(entries) => entries,
            other => {
                tracing::warn!(track = track_id, found = %other, "cue list is not an array, ignoring");
                return Ok(Vec::new());
            }
        };

        let mut cues: Vec<Cue> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Cue>(entry) {
                Ok(cue) => Some(cue),
                Err(err) => {
                    tracing::warn!(track = track_id, error = %err, "skipping invalid cue");
                    None
                }
            })
            .collect();
        cues.sort_by_key(|cue| cue.bar);
        Ok(cues)
    }

    /// Appends a cue and rewrites the whole ordered list. Returns the list as
    /// stored.
    pub fn add(&self, track_id: &str, cue: Cue) -> Result<Vec<Cue>> {
        let mut cues = self.load(track_id)?;
        cues.push(cue);
        cues.sort_by_key(|cue| cue.bar);
        self.store
            .put(&Self::key(track_id), serde_json::to_string(&cues)?)?;
        tracing::debug!(track = track_id, cues = cues.len(), "stored cue list");
        Ok(cues)
    }
}

impl std::fmt::Debug for CueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CueStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> (Rc<MemoryStore>, CueStore) {
        let memory = Rc::new(MemoryStore::new());
        let backend: Rc<dyn KeyValueStore> = memory.clone();
        (memory, CueStore::new(backend))
    }

    #[test]
    fn wire_format_uses_camel_case_action() {
        let json = serde_json::to_string(&Cue::switch_scene(8, ProgramName::Fluid)).unwrap();
        assert_eq!(json, r#"{"bar":8,"action":"switchScene","scene":"Fluid"}"#);
    }

    #[test]
    fn missing_list_is_empty() {
        let (_, cues) = store();
        assert!(cues.load("track-1").unwrap().is_empty());
    }

    #[test]
    fn add_keeps_the_list_ordered_by_bar() {
        let (memory, cues) = store();
        cues.add("t", Cue::switch_scene(16, ProgramName::Tunnel)).unwrap();
        cues.add("t", Cue::switch_scene(4, ProgramName::Fluid)).unwrap();
        let stored = cues.add("t", Cue::switch_scene(4, ProgramName::Terrain)).unwrap();

        let bars: Vec<u32> = stored.iter().map(|cue| cue.bar).collect();
        assert_eq!(bars, vec![4, 4, 16]);
        assert_eq!(stored[0].scene, ProgramName::Fluid);
        assert_eq!(stored[1].scene, ProgramName::Terrain);
        assert_eq!(cues.load("t").unwrap(), stored);
        assert!(memory.get("cues:t").unwrap().is_some());
        assert!(cues.load("other").unwrap().is_empty());
    }

    #[test]
    fn invalid_entries_are_skipped() {
        let (memory, cues) = store();
        memory
            .put(
                "cues:t",
                r#"[
                    {"bar": 2, "action": "switchScene", "scene": "Kaleidoscope"},
                    {"bar": -1, "action": "switchScene", "scene": "Fluid"},
                    {"bar": 3, "action": "fadeOut", "scene": "Fluid"},
                    {"bar": 1, "action": "switchScene", "scene": "Tunnel"},
                    "garbage"
                ]"#
                .to_string(),
            )
            .unwrap();

        assert_eq!(
            cues.load("t").unwrap(),
            vec![Cue::switch_scene(1, ProgramName::Tunnel)]
        );
    }

    #[test]
    fn non_array_payload_is_ignored_and_malformed_json_errors() {
        let (memory, cues) = store();
        memory.put("cues:a", r#"{"bar": 1}"#.to_string()).unwrap();
        memory.put("cues:b", "[{".to_string()).unwrap();
        assert!(cues.load("a").unwrap().is_empty());
        assert!(cues.load("b").is_err());
    }
}
