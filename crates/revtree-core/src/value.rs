#![forbid(unsafe_code)]

//! Dynamically typed values stored in tracked containers.
//!
//! Scalars compare by value; [`Value::Map`] and [`Value::Seq`] compare by
//! container identity, the same way two references to one object are equal.
//! That makes `set(key, same_handle)` a no-op and keeps comparisons cheap on
//! cyclic trees.

use serde_json::{Map as JsonMap, Number as JsonNumber, Value as Json};

use crate::container::{Container, ContainerError, ContainerId, IndexedSequence, KeyedContainer};

/// A value held by a container slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Marker for a sequence position that was never written.
    ///
    /// Writing past the end of a sequence fills the gap with `Absent`, so
    /// sparse writes become explicit runs of markers rather than holes.
    Absent,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Map(KeyedContainer),
    Seq(IndexedSequence),
}

impl Value {
    /// The container behind this value, if it is one.
    #[must_use]
    pub fn as_container(&self) -> Option<Container> {
        match self {
            Self::Map(map) => Some(Container::Keyed(map.clone())),
            Self::Seq(seq) => Some(Container::Indexed(seq.clone())),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_keyed(&self) -> Option<&KeyedContainer> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_indexed(&self) -> Option<&IndexedSequence> {
        match self {
            Self::Seq(seq) => Some(seq),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// True for maps and sequences.
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Map(_) | Self::Seq(_))
    }

    /// Build a value from JSON. Objects and arrays become fresh containers.
    #[must_use]
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Seq(IndexedSequence::from_values(
                items.into_iter().map(Self::from_json),
            )),
            Json::Object(entries) => Self::Map(KeyedContainer::from_entries(
                entries.into_iter().map(|(k, v)| (k, Self::from_json(v))),
            )),
        }
    }

    /// Snapshot this value (and everything reachable from it) as JSON.
    ///
    /// `Absent` and non-finite floats become `null`.
    ///
    /// # Errors
    ///
    /// [`ContainerError::Cycle`] if a container is reachable from itself.
    pub fn to_json(&self) -> Result<Json, ContainerError> {
        self.to_json_on_path(&mut Vec::new())
    }

    pub(crate) fn to_json_on_path(
        &self,
        path: &mut Vec<ContainerId>,
    ) -> Result<Json, ContainerError> {
        Ok(match self {
            Self::Absent | Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(n) => Json::Number(JsonNumber::from(*n)),
            Self::Float(f) => JsonNumber::from_f64(*f).map_or(Json::Null, Json::Number),
            Self::String(s) => Json::String(s.clone()),
            Self::Map(map) => {
                let id = map.id();
                if path.contains(&id) {
                    return Err(ContainerError::Cycle(id));
                }
                path.push(id);
                let mut out = JsonMap::new();
                for (key, value) in map.entries() {
                    out.insert(key, value.to_json_on_path(path)?);
                }
                path.pop();
                Json::Object(out)
            }
            Self::Seq(seq) => {
                let id = seq.id();
                if path.contains(&id) {
                    return Err(ContainerError::Cycle(id));
                }
                path.push(id);
                let items = seq
                    .to_vec()
                    .iter()
                    .map(|value| value.to_json_on_path(path))
                    .collect::<Result<Vec<_>, _>>()?;
                path.pop();
                Json::Array(items)
            }
        })
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<KeyedContainer> for Value {
    fn from(map: KeyedContainer) -> Self {
        Self::Map(map)
    }
}

impl From<IndexedSequence> for Value {
    fn from(seq: IndexedSequence) -> Self {
        Self::Seq(seq)
    }
}

impl From<Container> for Value {
    fn from(container: Container) -> Self {
        match container {
            Container::Keyed(map) => Self::Map(map),
            Container::Indexed(seq) => Self::Seq(seq),
        }
    }
}
