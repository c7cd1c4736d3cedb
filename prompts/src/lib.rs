//! Prompt library: a category -> key -> prompt-body document persisted as one JSON file,
//! plus the selection/draft controller that front ends drive one intent at a time.
//! The core stays free of any rendering concern; `main.rs` is just one consumer.

pub mod core {
    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /* ------------------------------ Aggregate ------------------------------ */

    /// Aggregate root: every category, in the order the file listed them.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Document {
        pub categories: IndexMap<String, Category>,
    }

    impl Document {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn category(&self, name: &str) -> Option<&Category> {
            self.categories.get(name)
        }

        pub fn category_mut(&mut self, name: &str) -> Option<&mut Category> {
            self.categories.get_mut(name)
        }

        /// Returns the named category, appending an empty one if it does not exist yet.
        pub fn category_or_insert(&mut self, name: &str) -> &mut Category {
            self.categories.entry(name.to_owned()).or_default()
        }

        pub fn category_names(&self) -> impl Iterator<Item = &str> {
            self.categories.keys().map(String::as_str)
        }

        pub fn is_empty(&self) -> bool {
            self.categories.is_empty()
        }
    }

    impl<C, K, V, I> FromIterator<(C, I)> for Document
    where
        C: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        fn from_iter<T: IntoIterator<Item = (C, I)>>(iter: T) -> Self {
            Self {
                categories: iter
                    .into_iter()
                    .map(|(name, entries)| -> (String, Category) {
                        (name.into(), Category::from_iter(entries))
                    })
                    .collect(),
            }
        }
    }

    /* ------------------------------ Entities ------------------------------ */

    /// Prompt bodies keyed by name. Keys are unique; insertion order is kept on disk
    /// but never shown (views always sort).
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Category {
        pub entries: IndexMap<String, String>,
    }

    impl Category {
        pub fn get(&self, key: &str) -> Option<&str> {
            self.entries.get(key).map(String::as_str)
        }

        pub fn contains(&self, key: &str) -> bool {
            self.entries.contains_key(key)
        }

        pub fn keys(&self) -> impl Iterator<Item = &str> {
            self.entries.keys().map(String::as_str)
        }

        /// Replaces in place when the key exists, appends otherwise.
        pub fn insert(&mut self, key: String, value: String) -> Option<String> {
            self.entries.insert(key, value)
        }

        pub fn remove(&mut self, key: &str) -> Option<String> {
            self.entries.shift_remove(key)
        }

        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }
    }

    impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Category {
        fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
            Self {
                entries: iter
                    .into_iter()
                    .map(|(k, v)| -> (String, String) { (k.into(), v.into()) })
                    .collect(),
            }
        }
    }

    /* ---------------------------- Value Objects ---------------------------- */

    /// The entry the draft was loaded from.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Selection {
        pub category: String,
        pub key: String,
    }

    /// Uncommitted (key, value) pair as typed by the user.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
    pub struct Draft {
        pub key: String,
        pub value: String,
    }

    impl Draft {
        pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
            Self {
                key: key.into(),
                value: value.into(),
            }
        }

        pub fn is_empty(&self) -> bool {
            self.key.is_empty() && self.value.is_empty()
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum EditState {
        /// No selection, empty draft.
        Idle,
        /// Selection set and the draft mirrors the stored entry.
        Viewing,
        /// Draft diverges from storage (editing an entry or composing a new one).
        Dirty,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    /// Failure taxonomy surfaced to the user alongside a message.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ErrorKind {
        FileMissing,
        FileRead,
        FileCorrupt,
        FileWrite,
        Validation,
        DuplicateKey,
        NoSelection,
        NotFound,
    }

    impl ErrorKind {
        pub fn as_str(self) -> &'static str {
            match self {
                ErrorKind::FileMissing => "file missing",
                ErrorKind::FileRead => "file unreadable",
                ErrorKind::FileCorrupt => "file corrupt",
                ErrorKind::FileWrite => "write failed",
                ErrorKind::Validation => "invalid input",
                ErrorKind::DuplicateKey => "duplicate key",
                ErrorKind::NoSelection => "no selection",
                ErrorKind::NotFound => "not found",
            }
        }
    }

    impl fmt::Display for ErrorKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }
}

pub mod config {
    use std::path::PathBuf;

    /// Data file used when no path is given.
    pub const DEFAULT_FILE: &str = "prompts.json";

    /// Pretty-print width of the data file.
    pub const DEFAULT_INDENT: usize = 4;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct StoreConfig {
        pub path: PathBuf,
        pub indent: usize,
    }

    impl StoreConfig {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                indent: DEFAULT_INDENT,
            }
        }

        pub fn with_indent(mut self, indent: usize) -> Self {
            self.indent = indent;
            self
        }
    }

    impl Default for StoreConfig {
        fn default() -> Self {
            Self::new(DEFAULT_FILE)
        }
    }
}

pub mod store {
    //! Persistence for the prompt document.
    //!
    //! Every `load`/`save` opens, fully reads or writes, and closes the file; nothing is held
    //! open between calls. Saves go through a sibling temp file that is renamed over the
    //! target, so a failed write never truncates the last good file.

    use super::config::StoreConfig;
    use super::core::{Document, ErrorKind};
    use serde::Serialize;
    use std::{
        cell::{Cell, RefCell},
        fs,
        io::{self, Write},
        path::{Path, PathBuf},
    };
    use tracing::{debug, warn};

    #[derive(Debug, thiserror::Error)]
    pub enum StoreError {
        #[error("{} not found", .path.display())]
        FileMissing { path: PathBuf },
        #[error("failed to read {}: {source}", .path.display())]
        FileRead {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
        #[error("{} is corrupt: {source}", .path.display())]
        FileCorrupt {
            path: PathBuf,
            #[source]
            source: serde_json::Error,
        },
        #[error("failed to save {}: {source}", .path.display())]
        FileWrite {
            path: PathBuf,
            #[source]
            source: io::Error,
        },
    }

    impl StoreError {
        pub fn kind(&self) -> ErrorKind {
            match self {
                StoreError::FileMissing { .. } => ErrorKind::FileMissing,
                StoreError::FileRead { .. } => ErrorKind::FileRead,
                StoreError::FileCorrupt { .. } => ErrorKind::FileCorrupt,
                StoreError::FileWrite { .. } => ErrorKind::FileWrite,
            }
        }

        pub fn path(&self) -> &Path {
            match self {
                StoreError::FileMissing { path }
                | StoreError::FileRead { path, .. }
                | StoreError::FileCorrupt { path, .. }
                | StoreError::FileWrite { path, .. } => path,
            }
        }
    }

    /// Loads and saves the whole document.
    pub trait DocumentStore {
        fn load(&self) -> Result<Document, StoreError>;

        fn save(&self, document: &Document) -> Result<(), StoreError>;

        /// Never fails: any load error degrades to an empty document and is handed back
        /// for the caller to report.
        fn load_or_empty(&self) -> (Document, Option<StoreError>) {
            match self.load() {
                Ok(document) => (document, None),
                Err(err) => {
                    warn!(error = %err, "starting from an empty document");
                    (Document::default(), Some(err))
                }
            }
        }
    }

    /* ------------------------------ JSON file ------------------------------ */

    #[derive(Debug, Clone)]
    pub struct JsonFileStore {
        config: StoreConfig,
    }

    impl JsonFileStore {
        pub fn new(config: StoreConfig) -> Self {
            Self { config }
        }

        pub fn at(path: impl Into<PathBuf>) -> Self {
            Self::new(StoreConfig::new(path))
        }

        pub fn path(&self) -> &Path {
            &self.config.path
        }
    }

    impl DocumentStore for JsonFileStore {
        fn load(&self) -> Result<Document, StoreError> {
            let path = self.path();
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(source) if source.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::FileMissing {
                        path: path.to_path_buf(),
                    });
                }
                Err(source) => {
                    return Err(StoreError::FileRead {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            };
            let document = parse_document(&text).map_err(|source| StoreError::FileCorrupt {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(
                path = %path.display(),
                categories = document.categories.len(),
                "loaded document"
            );
            Ok(document)
        }

        fn save(&self, document: &Document) -> Result<(), StoreError> {
            let path = self.path();
            let write_err = |source: io::Error| StoreError::FileWrite {
                path: path.to_path_buf(),
                source,
            };
            let bytes = encode_document(document, self.config.indent)
                .map_err(|err| write_err(err.into()))?;
            write_atomic(path, &bytes).map_err(write_err)?;
            debug!(path = %path.display(), bytes = bytes.len(), "saved document");
            Ok(())
        }
    }

    /// Strict parse: the root must be an object of objects of strings.
    pub fn parse_document(text: &str) -> Result<Document, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Pretty JSON with `indent` spaces and a trailing newline. Non-ASCII text is written
    /// as-is, never `\u`-escaped.
    pub fn encode_document(
        document: &Document,
        indent: usize,
    ) -> Result<Vec<u8>, serde_json::Error> {
        let indent = vec![b' '; indent];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
        let mut serializer = serde_json::Serializer::with_formatter(Vec::new(), formatter);
        document.serialize(&mut serializer)?;
        let mut bytes = serializer.into_inner();
        bytes.push(b'\n');
        Ok(bytes)
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix(".prompts-").suffix(".tmp");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Masked by the umask on creation, like a plain `fs::write` of a new file.
            builder.permissions(fs::Permissions::from_mode(0o666));
        }
        let mut tmp = builder.tempfile_in(dir)?;
        tmp.write_all(contents)?;
        if let Ok(meta) = fs::metadata(path) {
            tmp.as_file().set_permissions(meta.permissions())?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    /* ------------------------------ In-memory ------------------------------ */

    const MEMORY_PATH: &str = "<memory>";

    /// Store kept in process memory. Counts save attempts and can be told to fail them.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        document: RefCell<Option<Document>>,
        saves: Cell<usize>,
        fail_saves: Cell<bool>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_document(document: Document) -> Self {
            Self {
                document: RefCell::new(Some(document)),
                ..Self::default()
            }
        }

        /// Number of `save` calls so far, failed ones included.
        pub fn saves(&self) -> usize {
            self.saves.get()
        }

        pub fn set_fail_saves(&self, fail: bool) {
            self.fail_saves.set(fail);
        }

        pub fn stored(&self) -> Option<Document> {
            self.document.borrow().clone()
        }
    }

    impl DocumentStore for MemoryStore {
        fn load(&self) -> Result<Document, StoreError> {
            self.document
                .borrow()
                .clone()
                .ok_or_else(|| StoreError::FileMissing {
                    path: PathBuf::from(MEMORY_PATH),
                })
        }

        fn save(&self, document: &Document) -> Result<(), StoreError> {
            self.saves.set(self.saves.get() + 1);
            if self.fail_saves.get() {
                return Err(StoreError::FileWrite {
                    path: PathBuf::from(MEMORY_PATH),
                    source: io::Error::other("writes disabled"),
                });
            }
            *self.document.borrow_mut() = Some(document.clone());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn sample() -> Document {
            Document::from_iter([
                ("Coding", vec![("refactor", "Refactor this function for clarity.")]),
                ("写作", vec![("总结", "用三点总结下文。")]),
            ])
        }

        #[test]
        fn missing_file_is_reported_as_missing() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let store = JsonFileStore::at(tmp.path().join("prompts.json"));

            let err = store.load().expect_err("missing file");
            assert_eq!(err.kind(), ErrorKind::FileMissing);

            let (document, err) = store.load_or_empty();
            assert!(document.is_empty());
            assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::FileMissing));
        }

        #[test]
        fn invalid_json_and_wrong_shapes_are_corrupt() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("prompts.json");
            let store = JsonFileStore::at(&path);

            for text in ["{ not json", "[]", r#"{"Coding": "flat"}"#, r#"{"Coding": {"k": 1}}"#] {
                fs::write(&path, text).expect("write fixture");
                let err = store.load().expect_err("corrupt input");
                assert_eq!(err.kind(), ErrorKind::FileCorrupt, "input: {text}");
            }
        }

        #[test]
        fn directory_in_place_of_file_is_unreadable() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let store = JsonFileStore::at(tmp.path());

            let err = store.load().expect_err("directory");
            assert_eq!(err.kind(), ErrorKind::FileRead);
        }

        #[test]
        fn save_writes_four_space_indent_and_raw_unicode() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("prompts.json");
            let store = JsonFileStore::at(&path);

            store.save(&sample()).expect("save");
            let text = fs::read_to_string(&path).expect("read back");

            assert!(text.starts_with("{\n    \"Coding\": {\n        \"refactor\""));
            assert!(text.contains("\"写作\""));
            assert!(text.contains("用三点总结下文。"));
            assert!(!text.contains("\\u"));
            assert!(text.ends_with("}\n"));
        }

        #[cfg(unix)]
        #[test]
        fn new_file_gets_umask_permissions_and_existing_file_keeps_its_own() {
            use std::os::unix::fs::PermissionsExt;

            let mode = |path: &Path| {
                fs::metadata(path).expect("metadata").permissions().mode() & 0o777
            };
            let tmp = tempfile::tempdir().expect("tempdir");
            let reference = tmp.path().join("reference.json");
            fs::write(&reference, "{}").expect("write reference");

            let path = tmp.path().join("prompts.json");
            let store = JsonFileStore::at(&path);
            store.save(&sample()).expect("create");
            assert_eq!(mode(&path), mode(&reference));

            fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).expect("chmod");
            store.save(&sample()).expect("overwrite");
            assert_eq!(mode(&path), 0o640);
        }

        #[test]
        fn load_keeps_category_order_from_file() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("prompts.json");
            fs::write(&path, r#"{"Zeta": {}, "Alpha": {"b": "1", "a": "2"}, "Mid": {}}"#)
                .expect("write fixture");

            let document = JsonFileStore::at(&path).load().expect("load");
            let names: Vec<_> = document.category_names().collect();
            assert_eq!(names, ["Zeta", "Alpha", "Mid"]);
        }

        #[test]
        fn save_then_load_round_trips_exactly() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let store =
                JsonFileStore::new(StoreConfig::new(tmp.path().join("p.json")).with_indent(2));
            let mut document = sample();
            document
                .category_or_insert("Coding")
                .insert("quote".into(), "say \"hi\"\n\ttabbed — ok".into());

            store.save(&document).expect("save");
            assert_eq!(store.load().expect("load"), document);
        }

        #[test]
        fn failed_save_leaves_previous_file_intact() {
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("prompts.json");
            let store = JsonFileStore::at(&path);
            store.save(&sample()).expect("first save");

            let unwritable = JsonFileStore::at(tmp.path().join("missing-dir").join("prompts.json"));
            let err = unwritable.save(&Document::new()).expect_err("no parent dir");
            assert_eq!(err.kind(), ErrorKind::FileWrite);

            assert_eq!(store.load().expect("reload"), sample());
            let leftovers: Vec<_> = fs::read_dir(tmp.path())
                .expect("read dir")
                .filter_map(Result::ok)
                .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                .collect();
            assert!(leftovers.is_empty());
        }

        #[test]
        fn memory_store_counts_and_fails_saves() {
            let store = MemoryStore::new();
            assert_eq!(store.load().expect_err("empty").kind(), ErrorKind::FileMissing);

            store.save(&sample()).expect("save");
            store.set_fail_saves(true);
            assert_eq!(
                store.save(&Document::new()).expect_err("disabled").kind(),
                ErrorKind::FileWrite
            );

            assert_eq!(store.saves(), 2);
            assert_eq!(store.stored(), Some(sample()));
        }
    }
}

pub mod view {
    //! Pure projections used to render the lists. Safe to recompute on every keystroke.

    use super::core::{Category, Document};

    /// Category names in document order.
    pub fn categories(document: &Document) -> Vec<String> {
        document.category_names().map(str::to_owned).collect()
    }

    /// Keys containing `filter` case-insensitively, sorted ascending. An empty or absent
    /// filter keeps every key.
    pub fn visible_keys(category: &Category, filter: Option<&str>) -> Vec<String> {
        let needle = filter.filter(|f| !f.is_empty()).map(str::to_lowercase);
        let mut keys: Vec<String> = category
            .keys()
            .filter(|key| {
                needle
                    .as_deref()
                    .is_none_or(|needle| key.to_lowercase().contains(needle))
            })
            .map(str::to_owned)
            .collect();
        keys.sort();
        keys
    }

}

pub mod controller {
    //! Selection/draft state machine sitting between a front end and the document.
    //!
    //! Every intent runs to completion, including the single save a mutation triggers,
    //! before the next one is accepted. The last result is kept as a one-shot [`Notice`].

    use super::core::{Document, Draft, EditState, ErrorKind, Selection};
    use super::store::{DocumentStore, StoreError};
    use super::view;
    use serde::Serialize;
    use std::fmt;
    use tracing::{debug, info, warn};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Field {
        Category,
        Key,
        Value,
    }

    impl fmt::Display for Field {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Field::Category => "category",
                Field::Key => "key",
                Field::Value => "value",
            })
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Action {
        Update,
        Delete,
    }

    impl fmt::Display for Action {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Action::Update => "update",
                Action::Delete => "delete",
            })
        }
    }

    #[derive(Debug, thiserror::Error)]
    pub enum EditError {
        #[error("category, key and value must all be non-empty ({field} is empty)")]
        Validation { field: Field },
        #[error("key '{key}' already exists in category '{category}'")]
        DuplicateKey { category: String, key: String },
        #[error("select an item to {action} first")]
        NoSelection { action: Action },
        #[error("'{category}' -> '{key}' was not found; the list may be out of sync with the data")]
        NotFound { category: String, key: String },
        #[error("{source}; the change is applied in memory but not on disk yet")]
        Save {
            #[source]
            source: StoreError,
        },
    }

    impl EditError {
        pub fn kind(&self) -> ErrorKind {
            match self {
                EditError::Validation { .. } => ErrorKind::Validation,
                EditError::DuplicateKey { .. } => ErrorKind::DuplicateKey,
                EditError::NoSelection { .. } => ErrorKind::NoSelection,
                EditError::NotFound { .. } => ErrorKind::NotFound,
                EditError::Save { source } => source.kind(),
            }
        }
    }

    /// Successful result of a mutating intent.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Outcome {
        Added {
            key: String,
        },
        Updated {
            key: String,
            renamed_from: Option<String>,
        },
        Deleted {
            key: String,
        },
        Cancelled,
        Saved,
        Reloaded,
    }

    impl fmt::Display for Outcome {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Outcome::Added { key } => write!(f, "added '{key}'"),
                Outcome::Updated {
                    key,
                    renamed_from: Some(old),
                } => write!(f, "renamed '{old}' to '{key}' and updated it"),
                Outcome::Updated { key, .. } => write!(f, "updated '{key}'"),
                Outcome::Deleted { key } => write!(f, "deleted '{key}'"),
                Outcome::Cancelled => f.write_str("nothing changed"),
                Outcome::Saved => f.write_str("saved"),
                Outcome::Reloaded => f.write_str("reloaded from disk"),
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(rename_all = "snake_case")]
    pub enum NoticeKind {
        Success,
        Info,
        Error(ErrorKind),
    }

    /// One-shot message describing the last operation.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct Notice {
        pub kind: NoticeKind,
        pub message: String,
    }

    impl Notice {
        fn from_result(result: &Result<Outcome, EditError>) -> Self {
            match result {
                Ok(Outcome::Cancelled) => Self {
                    kind: NoticeKind::Info,
                    message: Outcome::Cancelled.to_string(),
                },
                Ok(outcome) => Self {
                    kind: NoticeKind::Success,
                    message: outcome.to_string(),
                },
                Err(err) => Self::error(err.kind(), err.to_string()),
            }
        }

        fn error(kind: ErrorKind, message: String) -> Self {
            Self {
                kind: NoticeKind::Error(kind),
                message,
            }
        }
    }

    /// Everything a front end needs to render.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize)]
    pub struct ViewState {
        pub categories: Vec<String>,
        pub active_category: Option<String>,
        pub search: String,
        pub visible_keys: Vec<String>,
        pub draft: Draft,
        pub selection: Option<Selection>,
        pub state: EditState,
    }

    pub struct Controller<S: DocumentStore> {
        store: S,
        document: Document,
        active: Option<String>,
        search: String,
        visible: Vec<String>,
        selection: Option<Selection>,
        draft: Draft,
        notice: Option<Notice>,
        unsaved: bool,
    }

    impl<S: DocumentStore> Controller<S> {
        /// Loads the document (empty on failure, with the error as the first notice) and
        /// activates its first category.
        pub fn open(store: S) -> Self {
            let (document, error) = store.load_or_empty();
            let mut controller = Self::with_document(store, document);
            if let Some(err) = error {
                controller.notice = Some(Notice::error(err.kind(), err.to_string()));
            }
            controller
        }

        pub fn with_document(store: S, document: Document) -> Self {
            let mut controller = Self {
                store,
                document,
                active: None,
                search: String::new(),
                visible: Vec::new(),
                selection: None,
                draft: Draft::default(),
                notice: None,
                unsaved: false,
            };
            let first = controller.document.category_names().next().map(str::to_owned);
            if let Some(first) = first {
                controller.select_category(&first);
            }
            controller
        }

        /* ------------------------------- Reads ------------------------------- */

        pub fn store(&self) -> &S {
            &self.store
        }

        pub fn document(&self) -> &Document {
            &self.document
        }

        pub fn categories(&self) -> Vec<String> {
            view::categories(&self.document)
        }

        pub fn active_category(&self) -> Option<&str> {
            self.active.as_deref()
        }

        pub fn search_text(&self) -> &str {
            &self.search
        }

        pub fn visible_keys(&self) -> &[String] {
            &self.visible
        }

        pub fn selection(&self) -> Option<&Selection> {
            self.selection.as_ref()
        }

        pub fn draft(&self) -> &Draft {
            &self.draft
        }

        /// True while the last save failed and memory is ahead of disk.
        pub fn has_unsaved_changes(&self) -> bool {
            self.unsaved
        }

        pub fn take_notice(&mut self) -> Option<Notice> {
            self.notice.take()
        }

        pub fn state(&self) -> EditState {
            match &self.selection {
                None if self.draft.is_empty() => EditState::Idle,
                Some(selection)
                    if self.draft.key == selection.key
                        && self.stored_value(selection) == Some(self.draft.value.as_str()) =>
                {
                    EditState::Viewing
                }
                _ => EditState::Dirty,
            }
        }

        pub fn snapshot(&self) -> ViewState {
            ViewState {
                categories: self.categories(),
                active_category: self.active.clone(),
                search: self.search.clone(),
                visible_keys: self.visible.clone(),
                draft: self.draft.clone(),
                selection: self.selection.clone(),
                state: self.state(),
            }
        }

        /* ---------------------------- Navigation ---------------------------- */

        /// Activates `name`, dropping the search filter, selection and draft. A name the
        /// document does not know yet is kept as a pending, empty category.
        pub fn select_category(&mut self, name: &str) {
            self.notice = None;
            debug!(category = name, "select category");
            self.active = (!name.trim().is_empty()).then(|| name.to_owned());
            self.search.clear();
            self.reset_edit();
            self.refresh();
        }

        /// Re-filters the visible keys. Selection and draft are kept even when the filter
        /// hides the selected key.
        pub fn search(&mut self, text: &str) {
            self.notice = None;
            debug!(filter = text, "search");
            self.search = text.to_owned();
            self.refresh();
        }

        pub fn select_item(&mut self, key: &str) -> Result<(), EditError> {
            self.notice = None;
            let Some(category) = self.active.clone() else {
                return Err(self.fail(EditError::Validation {
                    field: Field::Category,
                }));
            };
            let Some(value) = self
                .document
                .category(&category)
                .and_then(|c| c.get(key))
                .map(str::to_owned)
            else {
                return Err(self.fail(EditError::NotFound {
                    category,
                    key: key.to_owned(),
                }));
            };
            debug!(category = %category, key, "select item");
            self.selection = Some(Selection {
                category,
                key: key.to_owned(),
            });
            self.draft = Draft::new(key, value);
            Ok(())
        }

        pub fn clear(&mut self) {
            self.notice = None;
            debug!("clear draft");
            self.reset_edit();
        }

        /// Replaces the draft with raw user input; nothing is validated or stored.
        pub fn edit_draft(&mut self, key: &str, value: &str) {
            self.notice = None;
            self.draft = Draft::new(key, value);
        }

        /* ----------------------------- Mutations ----------------------------- */

        pub fn add(&mut self, key: &str, value: &str) -> Result<Outcome, EditError> {
            self.notice = None;
            let result = self.try_add(key, value);
            self.record(result)
        }

        pub fn update(&mut self, key: &str, value: &str) -> Result<Outcome, EditError> {
            self.notice = None;
            let result = self.try_update(key, value);
            self.record(result)
        }

        /// Removes the selected entry once `confirmed`; unconfirmed calls change nothing.
        pub fn delete(&mut self, confirmed: bool) -> Result<Outcome, EditError> {
            self.notice = None;
            let result = self.try_delete(confirmed);
            self.record(result)
        }

        /// Like [`Controller::delete`], asking `confirm` about the selected entry first.
        pub fn delete_with(
            &mut self,
            confirm: impl FnOnce(&Selection) -> bool,
        ) -> Result<Outcome, EditError> {
            let confirmed = self.selection.as_ref().is_some_and(confirm);
            self.delete(confirmed)
        }

        /// Re-attempts writing the in-memory document.
        pub fn flush(&mut self) -> Result<Outcome, EditError> {
            self.notice = None;
            let result = self.persist().map(|()| Outcome::Saved);
            self.record(result)
        }

        /// Re-reads the store. On failure the in-memory document is kept as is.
        pub fn reload(&mut self) -> Result<Outcome, StoreError> {
            self.notice = None;
            match self.store.load() {
                Ok(document) => {
                    info!(categories = document.categories.len(), "reloaded document");
                    self.document = document;
                    self.unsaved = false;
                    let keep_active = self
                        .active
                        .as_deref()
                        .is_some_and(|name| self.document.category(name).is_some());
                    if !keep_active {
                        self.active = self.document.category_names().next().map(str::to_owned);
                        self.search.clear();
                        self.reset_edit();
                    }
                    self.refresh();
                    self.notice = Some(Notice::from_result(&Ok(Outcome::Reloaded)));
                    Ok(Outcome::Reloaded)
                }
                Err(err) => {
                    warn!(error = %err, "reload failed; keeping the document in memory");
                    self.notice = Some(Notice::error(err.kind(), err.to_string()));
                    Err(err)
                }
            }
        }

        fn try_add(&mut self, key: &str, value: &str) -> Result<Outcome, EditError> {
            let (category, key, value) = self.validate(key, value)?;
            if self
                .document
                .category(&category)
                .is_some_and(|c| c.contains(&key))
            {
                return Err(EditError::DuplicateKey { category, key });
            }
            self.document
                .category_or_insert(&category)
                .insert(key.clone(), value.clone());
            info!(category = %category, key = %key, "added entry");

            self.after_write(category, &key);
            self.persist()?;
            self.draft = Draft::new(key.clone(), value);
            Ok(Outcome::Added { key })
        }

        fn try_update(&mut self, key: &str, value: &str) -> Result<Outcome, EditError> {
            let Some(selection) = self.selection.clone() else {
                return Err(EditError::NoSelection {
                    action: Action::Update,
                });
            };
            let (category, key, value) = self.validate(key, value)?;
            let Some(entries) = self
                .document
                .category_mut(&selection.category)
                .filter(|c| c.contains(&selection.key))
            else {
                return Err(EditError::NotFound {
                    category: selection.category,
                    key: selection.key,
                });
            };

            let renamed_from = if key != selection.key {
                if entries.contains(&key) {
                    return Err(EditError::DuplicateKey { category, key });
                }
                entries.remove(&selection.key);
                Some(selection.key)
            } else {
                None
            };
            entries.insert(key.clone(), value.clone());
            info!(category = %category, key = %key, renamed_from = ?renamed_from, "updated entry");

            self.after_write(category, &key);
            self.persist()?;
            self.draft = Draft::new(key.clone(), value);
            Ok(Outcome::Updated { key, renamed_from })
        }

        fn try_delete(&mut self, confirmed: bool) -> Result<Outcome, EditError> {
            let Some(selection) = self.selection.clone() else {
                return Err(EditError::NoSelection {
                    action: Action::Delete,
                });
            };
            if !confirmed {
                debug!(key = %selection.key, "delete not confirmed");
                return Ok(Outcome::Cancelled);
            }
            let removed = self
                .document
                .category_mut(&selection.category)
                .and_then(|c| c.remove(&selection.key));
            if removed.is_none() {
                self.refresh();
                return Err(EditError::NotFound {
                    category: selection.category,
                    key: selection.key,
                });
            }
            info!(category = %selection.category, key = %selection.key, "deleted entry");

            self.search.clear();
            self.reset_edit();
            self.refresh();
            self.persist()?;
            Ok(Outcome::Deleted { key: selection.key })
        }

        /* ------------------------------ Helpers ------------------------------ */

        /// Trimmed (category, key, value), or the first empty field.
        fn validate(&self, key: &str, value: &str) -> Result<(String, String, String), EditError> {
            let category = self.active.clone().ok_or(EditError::Validation {
                field: Field::Category,
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(EditError::Validation { field: Field::Key });
            }
            let value = value.trim();
            if value.is_empty() {
                return Err(EditError::Validation {
                    field: Field::Value,
                });
            }
            Ok((category, key.to_owned(), value.to_owned()))
        }

        /// Shows the whole category again and selects the entry just written.
        fn after_write(&mut self, category: String, key: &str) {
            self.search.clear();
            self.refresh();
            self.selection = Some(Selection {
                category,
                key: key.to_owned(),
            });
        }

        fn persist(&mut self) -> Result<(), EditError> {
            match self.store.save(&self.document) {
                Ok(()) => {
                    self.unsaved = false;
                    Ok(())
                }
                Err(source) => {
                    warn!(error = %source, "save failed; memory is ahead of disk");
                    self.unsaved = true;
                    Err(EditError::Save { source })
                }
            }
        }

        fn refresh(&mut self) {
            self.visible = match self.active.as_deref().and_then(|n| self.document.category(n)) {
                Some(category) => view::visible_keys(category, Some(self.search.as_str())),
                None => Vec::new(),
            };
            let stale = self.selection.as_ref().is_some_and(|selection| {
                self.active.as_deref() != Some(selection.category.as_str())
                    || !self
                        .document
                        .category(&selection.category)
                        .is_some_and(|category| category.contains(&selection.key))
            });
            if stale {
                debug!("dropping stale selection");
                self.selection = None;
            }
        }

        fn reset_edit(&mut self) {
            self.selection = None;
            self.draft = Draft::default();
        }

        fn stored_value(&self, selection: &Selection) -> Option<&str> {
            self.document
                .category(&selection.category)
                .and_then(|c| c.get(&selection.key))
        }

        fn record(&mut self, result: Result<Outcome, EditError>) -> Result<Outcome, EditError> {
            if let Err(err) = &result {
                debug!(kind = %err.kind(), error = %err, "intent failed");
            }
            self.notice = Some(Notice::from_result(&result));
            result
        }

        fn fail(&mut self, err: EditError) -> EditError {
            self.notice = Some(Notice::error(err.kind(), err.to_string()));
            err
        }
    }

}

pub mod logging {
    //! stderr `tracing` subscriber for the binary. `RUST_LOG` wins unless `--verbose` is set.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    pub fn filter(verbose: bool) -> EnvFilter {
        if verbose {
            return EnvFilter::new("debug");
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }

    pub fn init(verbose: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(filter(verbose))
            .try_init()
    }
}

pub use controller::{Controller, EditError, Notice, NoticeKind, Outcome, ViewState};
pub use self::core::{Category, Document, Draft, EditState, ErrorKind, Selection};
pub use store::{DocumentStore, JsonFileStore, MemoryStore, StoreError};
