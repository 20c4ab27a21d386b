//! Store naming for one worker generation.

use std::fmt;

/// The four stores every generation owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Static,
    Dynamic,
    Image,
    Api,
}

impl StoreKind {
    pub const ALL: [StoreKind; 4] = [
        StoreKind::Static,
        StoreKind::Dynamic,
        StoreKind::Image,
        StoreKind::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Static => "static",
            StoreKind::Dynamic => "dynamic",
            StoreKind::Image => "image",
            StoreKind::Api => "api",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical store names for the current version.
///
/// Anything in cache storage whose name is not one of these four belongs
/// to an older generation and is purged on activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    version: String,
    names: [String; 4],
}

impl Generation {
    /// Names take the form `{prefix}-{kind}-{version}`.
    pub fn new(prefix: &str, version: &str) -> Self {
        let names = StoreKind::ALL.map(|kind| format!("{prefix}-{kind}-{version}"));
        Self {
            version: version.to_string(),
            names,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Store name for a kind.
    pub fn store(&self, kind: StoreKind) -> &str {
        let index = match kind {
            StoreKind::Static => 0,
            StoreKind::Dynamic => 1,
            StoreKind::Image => 2,
            StoreKind::Api => 3,
        };
        &self.names[index]
    }

    /// All four names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Whether `name` is one of this generation's stores.
    pub fn is_current(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }
}
