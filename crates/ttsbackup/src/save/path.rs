//! Typed locators into the raw save document
//!
//! A `JsonPath` pins down one subtree or scalar inside the original JSON.
//! Paths are recorded while the parser descends and later replayed by the
//! scanner and the rewrite engine, so they have to stay stable for the
//! lifetime of a loaded document.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// One step of a `JsonPath`: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A stable locator for one position inside the save document.
///
/// Equality and hashing are structural, so a path can serve as a join key
/// between scan and rewrite. The `Display` form is the dotted notation used
/// in manifests, e.g. `ObjectStates[0].CustomDeck.123.FaceURL`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// Path addressing the document root.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Extend the path with an object key.
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.into()));
        Self { segments }
    }

    /// Extend the path with an array index.
    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// True when the last segments are exactly the given object keys.
    pub fn ends_with_keys(&self, keys: &[&str]) -> bool {
        if keys.len() > self.segments.len() {
            return false;
        }
        self.segments[self.segments.len() - keys.len()..]
            .iter()
            .zip(keys)
            .all(|(seg, key)| matches!(seg, PathSegment::Key(k) if k == key))
    }

    /// Walk the path down from `root`, returning the addressed value.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => current.as_object()?.get(key)?,
                PathSegment::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        Some(current)
    }

    /// Mutable variant of [`resolve`](Self::resolve), used by the rewrite engine.
    pub fn resolve_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => current.as_object_mut()?.get_mut(key)?,
                PathSegment::Index(index) => current.as_array_mut()?.get_mut(*index)?,
            };
        }
        Some(current)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{key}")?;
                }
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
