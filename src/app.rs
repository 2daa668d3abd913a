use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Free-form named attributes attached to an [`App`].
///
/// Uses `set` rather than `insert`: values are applied as-is, with no
/// validation, and a later `set` overwrites an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(HashMap<String, String>);

impl Attributes {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Merges `other` in; its values win on conflicts.
    pub fn extend(&mut self, other: Attributes) {
        self.0.extend(other.0);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> HashMap<String, String> {
        self.0
    }
}

impl From<HashMap<String, String>> for Attributes {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// Describes the application under test: where it lives plus whatever
/// attributes the caller wants to carry along. Has no behavior of its own.
#[derive(Debug, Clone)]
pub struct App {
    app_path: PathBuf,
    attributes: Attributes,
}

impl App {
    /// Creates a descriptor for `app_path`, or the current directory when
    /// `None`.
    ///
    /// The path is canonicalized when it exists and made absolute otherwise.
    pub fn new(app_path: Option<PathBuf>) -> io::Result<Self> {
        let app_path = match app_path {
            Some(path) => path,
            None => std::env::current_dir()?,
        };

        Ok(Self {
            app_path: resolve(&app_path)?,
            attributes: Attributes::new(),
        })
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.set(key, value);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.set(key, value);
    }

    pub fn app_path(&self) -> &Path {
        &self.app_path
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

fn resolve(path: &Path) -> io::Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(_) => std::path::absolute(path),
    }
}
