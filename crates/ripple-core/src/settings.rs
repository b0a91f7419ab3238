//! User settings persistence.
//!
//! Settings live in a sectioned JSON document: attributes of the default
//! section sit at the top level, named sections under `"section:<name>"`
//! keys. In window mode the document is written to disk; in browser mode a
//! delta is pushed to the client for local storage. Writes are debounced and
//! skipped entirely when the serialized document did not change.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::Session;

const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

const SECTION_PREFIX: &str = "section:";

/// In-memory settings document plus persistence bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct SettingsStore {
    file: Option<PathBuf>,
    /// Section name → attributes. The default section is the empty string.
    sections: BTreeMap<String, Map<String, Json>>,
    /// Last document written, to skip no-op saves.
    last_serialized: Option<String>,
    save_scheduled: bool,
}

impl SettingsStore {
    pub fn new(file: Option<PathBuf>) -> Self {
        let mut store = Self {
            file,
            ..Self::default()
        };
        store.load();
        store
    }

    fn load(&mut self) {
        let Some(path) = &self.file else {
            return;
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return,
        };
        let Ok(Json::Object(document)) = serde_json::from_str::<Json>(&text) else {
            warn!(path = %path.display(), "settings file is not a JSON object, ignoring");
            return;
        };
        for (key, value) in document {
            if let Some(section) = key.strip_prefix(SECTION_PREFIX) {
                if let Json::Object(attributes) = value {
                    self.sections.insert(section.to_owned(), attributes);
                }
            } else {
                self.sections
                    .entry(String::new())
                    .or_default()
                    .insert(key, value);
            }
        }
        self.last_serialized = None;
    }

    pub fn get(&self, section: &str, key: &str) -> Option<Json> {
        self.sections.get(section)?.get(key).cloned()
    }

    pub fn set(&mut self, section: &str, key: String, value: Json) {
        self.sections
            .entry(section.to_owned())
            .or_default()
            .insert(key, value);
    }

    /// Assemble the persisted document shape.
    pub fn to_document(&self) -> Map<String, Json> {
        let mut document = Map::new();
        for (section, attributes) in &self.sections {
            if section.is_empty() {
                for (key, value) in attributes {
                    document.insert(key.clone(), value.clone());
                }
            } else {
                document.insert(
                    format!("{SECTION_PREFIX}{section}"),
                    Json::Object(attributes.clone()),
                );
            }
        }
        document
    }
}

impl Session {
    /// Read a persisted setting. `section` of `None` addresses the default
    /// section.
    pub fn setting(&self, section: Option<&str>, key: &str) -> Option<Json> {
        self.inner()
            .settings
            .borrow()
            .get(section.unwrap_or(""), key)
    }

    /// Store a setting and schedule a debounced save.
    pub fn update_setting(&self, section: Option<&str>, key: &str, value: Json) {
        self.inner()
            .settings
            .borrow_mut()
            .set(section.unwrap_or(""), key.to_owned(), value);
        self.save_settings_soon();
    }

    /// Schedule a save unless one is already pending.
    pub(crate) fn save_settings_soon(&self) {
        {
            let mut settings = self.inner().settings.borrow_mut();
            if settings.save_scheduled {
                return;
            }
            settings.save_scheduled = true;
        }
        let session = self.clone();
        self.create_task(
            async move {
                tokio::time::sleep(SAVE_DEBOUNCE).await;
                session.inner().settings.borrow_mut().save_scheduled = false;
                if let Err(err) = session.save_settings_now().await {
                    warn!(%err, "failed to persist settings");
                }
            },
            "settings save",
        );
    }

    /// Persist the settings document immediately. Skipped when nothing
    /// changed since the last save.
    pub(crate) async fn save_settings_now(&self) -> Result<()> {
        let (document, serialized, path) = {
            let settings = self.inner().settings.borrow();
            let document = settings.to_document();
            let serialized =
                serde_json::to_string_pretty(&document).unwrap_or_else(|_| "{}".to_owned());
            (document, serialized, settings.file.clone())
        };

        if document.is_empty() {
            return Ok(());
        }
        {
            let mut settings = self.inner().settings.borrow_mut();
            if settings.last_serialized.as_deref() == Some(serialized.as_str()) {
                debug!("settings unchanged, skipping save");
                return Ok(());
            }
            settings.last_serialized = Some(serialized.clone());
        }

        match path {
            Some(path) => {
                if let Err(err) = std::fs::write(&path, serialized) {
                    warn!(path = %path.display(), %err, "could not write settings file");
                }
                Ok(())
            }
            None => {
                if self.connected().is_set() {
                    self.send_user_settings(Json::Object(document)).await
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_layout_inlines_the_default_section() {
        let mut store = SettingsStore::new(None);
        store.set("", "volume".to_owned(), json!(7));
        store.set("editor", "tab_width".to_owned(), json!(4));

        let document = store.to_document();
        assert_eq!(document.get("volume"), Some(&json!(7)));
        assert_eq!(
            document.get("section:editor"),
            Some(&json!({ "tab_width": 4 }))
        );
    }

    #[test]
    fn load_roundtrip_through_a_file() {
        let dir = std::env::temp_dir().join(format!(
            "ripple-settings-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.json");
        std::fs::write(
            &path,
            r#"{ "volume": 7, "section:editor": { "tab_width": 4 } }"#,
        )
        .unwrap();

        let store = SettingsStore::new(Some(path.clone()));
        assert_eq!(store.get("", "volume"), Some(json!(7)));
        assert_eq!(store.get("editor", "tab_width"), Some(json!(4)));

        std::fs::remove_file(path).ok();
    }
}
