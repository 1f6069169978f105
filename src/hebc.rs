//! The HEBC (hardware-encoded buffer compression) application whitelist.
//!
//! A JSON file of shape `{"HEBC": {"AppName": [...]}}` lists the
//! applications allowed to use compressed buffer layouts. The file is read
//! once per process; a missing or malformed file yields an empty list, so
//! HEBC quietly stays off.

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::debug;

/// Default location of the whitelist, relative to the config root.
pub const HEBC_CONFIG_PATH: &str = "etc/graphics_game/config/graphics_game.json";

const MAX_FILE_SIZE: u64 = 32 * 1024 * 1024;
const MAX_ENTRY_COUNT: usize = 10_000;
const MAX_APP_NAME_LEN: usize = 1024;

#[derive(Debug, Default, Deserialize)]
struct ConfigRoot {
    #[serde(rename = "HEBC", default)]
    hebc: HebcSection,
}

#[derive(Debug, Default, Deserialize)]
struct HebcSection {
    #[serde(rename = "AppName", default)]
    app_names: Vec<String>,
}

static GLOBAL: Lazy<HebcWhiteList> = Lazy::new(|| {
    let mut list = HebcWhiteList::load(Path::new(HEBC_CONFIG_PATH));
    list.app_name = process_name();
    list
});

/// The parsed whitelist plus the current process's application name.
#[derive(Debug, Default)]
pub struct HebcWhiteList {
    entries: Vec<String>,
    app_name: String,
}

impl HebcWhiteList {
    /// The process-wide instance, loaded once from
    /// [`HEBC_CONFIG_PATH`].
    pub fn global() -> &'static HebcWhiteList {
        &GLOBAL
    }

    /// Loads a whitelist from `path`. Any error yields an empty list.
    pub fn load(path: &Path) -> HebcWhiteList {
        let entries = read_entries(path).unwrap_or_default();
        debug!(path = %path.display(), entries = entries.len(), "hebc whitelist loaded");
        HebcWhiteList {
            entries,
            app_name: String::new(),
        }
    }

    /// Whether `app_name` is allowed to use HEBC.
    pub fn check(&self, app_name: &str) -> bool {
        self.entries.iter().any(|entry| entry == app_name)
    }

    /// The current process's application name, as read from
    /// `/proc/self/cmdline`.
    pub fn application_name(&self) -> String {
        self.app_name.clone()
    }

    /// The whitelisted names.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

fn read_entries(path: &Path) -> Option<Vec<String>> {
    let metadata = fs::metadata(path).ok()?;
    if metadata.len() == 0 || metadata.len() > MAX_FILE_SIZE {
        return None;
    }
    let contents = fs::read_to_string(path).ok()?;
    let root: ConfigRoot = serde_json::from_str(&contents).ok()?;
    Some(
        root.hebc
            .app_names
            .into_iter()
            .take(MAX_ENTRY_COUNT)
            .map(|mut name| {
                name.truncate(MAX_APP_NAME_LEN);
                name
            })
            .collect(),
    )
}

fn process_name() -> String {
    let cmdline = fs::read("/proc/self/cmdline").unwrap_or_default();
    let first = cmdline.split(|byte| *byte == 0).next().unwrap_or(&[]);
    let mut name = String::from_utf8_lossy(first).into_owned();
    name.truncate(MAX_APP_NAME_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_the_expected_shape() {
        let file = write_config(r#"{"HEBC": {"AppName": ["com.game.one", "com.game.two"]}}"#);
        let list = HebcWhiteList::load(file.path());
        assert!(list.check("com.game.one"));
        assert!(list.check("com.game.two"));
        assert!(!list.check("com.other"));
    }

    #[test]
    fn malformed_or_missing_files_yield_an_empty_list() {
        let file = write_config("{not json");
        assert!(HebcWhiteList::load(file.path()).entries().is_empty());

        let missing = HebcWhiteList::load(Path::new("/nonexistent/graphics_game.json"));
        assert!(missing.entries().is_empty());
    }

    #[test]
    fn unrelated_keys_are_ignored() {
        let file = write_config(r#"{"OTHER": {"AppName": ["x"]}}"#);
        let list = HebcWhiteList::load(file.path());
        assert!(list.entries().is_empty());

        let file = write_config(r#"{"HEBC": {}}"#);
        let list = HebcWhiteList::load(file.path());
        assert!(list.entries().is_empty());
    }

    #[test]
    fn oversized_names_are_truncated() {
        let long = "a".repeat(5000);
        let file = write_config(&format!(r#"{{"HEBC": {{"AppName": ["{}"]}}}}"#, long));
        let list = HebcWhiteList::load(file.path());
        assert_eq!(list.entries()[0].len(), 1024);
    }

    #[test]
    fn process_name_is_discovered() {
        // The test binary's own name; only shape is asserted.
        let name = process_name();
        assert!(!name.contains('\0'));
    }
}
