//! Domain identifiers (strongly-typed IDs).
//!
//! All IDs are ULIDs wrapped in a generic `Id<T>`, where `T` is a zero-sized
//! marker type. This keeps one implementation while making `TaskId` and
//! `WorkerId` impossible to mix up at compile time.
//!
//! The string form is `<prefix><ULID>` (e.g. `task-01J...`). External
//! collaborators only ever see that string, so it also parses back.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Mutex;
use ulid::{Generator, Ulid};

/// Marker trait for each ID kind. Supplies the display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed identifier.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when an id string is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{input}': expected '{prefix}<ULID>'")]
pub struct ParseIdError {
    pub input: String,
    pub prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            input: s.to_string(),
            prefix: T::prefix(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

// Serialized as the prefixed display string, same as what callers pass back.
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Task marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Worker generation marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Worker {}

impl IdMarker for Worker {
    fn prefix() -> &'static str {
        "worker-"
    }
}

/// Identifier of a submitted task. Doubles as the correlation key on the
/// supervisor <-> worker channel.
pub type TaskId = Id<Task>;

/// Identifier of one worker execution context. A new one is minted every time
/// the supervisor (re)creates the worker.
pub type WorkerId = Id<Worker>;

/// Monotonic ID source.
///
/// Wraps `ulid::Generator` so ids minted within the same millisecond still
/// sort in creation order.
#[derive(Default)]
pub struct IdGenerator {
    inner: Mutex<Generator>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next<T: IdMarker>(&self) -> Id<T> {
        let ulid = match self.inner.lock() {
            Ok(mut generator) => generator.generate().unwrap_or_else(|_| Ulid::new()),
            // random part overflowed or lock poisoned: fall back to a fresh ULID
            Err(_) => Ulid::new(),
        };
        Id::from_ulid(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let task = TaskId::from_ulid(Ulid::new());
        let worker = WorkerId::from_ulid(Ulid::new());

        assert!(task.to_string().starts_with("task-"));
        assert!(worker.to_string().starts_with("worker-"));

        // let _: TaskId = worker; // <- does not compile
    }

    #[test]
    fn task_id_parses_from_its_display_form() {
        let id = TaskId::from_ulid(Ulid::new());
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_wrong_prefix_and_garbage() {
        let worker = WorkerId::from_ulid(Ulid::new());
        assert!(worker.to_string().parse::<TaskId>().is_err());
        assert!("task-not-a-ulid".parse::<TaskId>().is_err());
        assert!("".parse::<TaskId>().is_err());
    }

    #[test]
    fn ids_serialize_as_prefixed_strings() {
        let id = TaskId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generator_is_monotonic_within_a_millisecond() {
        let ids = IdGenerator::new();
        let a: TaskId = ids.next();
        let b: TaskId = ids.next();
        let c: TaskId = ids.next();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
        assert_eq!(size_of::<WorkerId>(), 16);
    }
}
