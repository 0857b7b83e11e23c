//! Globally unique identifiers, per spec §3 ("Identifier").
//!
//! A bare `Id<T>` wraps a `Uuid` tagged with a zero-sized marker type so
//! the compiler rejects mixing, say, a `ReservationId` where a
//! `DelegationId` is expected. This mirrors the teacher's own `Id<T>`
//! (`domain::vrm_system_model::utils::id`), generalized from string-backed
//! ids to uuid-backed ones since this kernel mints its own identifiers
//! rather than reading them from a loaded file.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub struct Id<T> {
    uuid: Uuid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    pub fn new() -> Self {
        Id { uuid: Uuid::new_v4(), _marker: PhantomData }
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Id { uuid, _marker: PhantomData }
    }

    /// The stable string form required by spec §3.
    pub fn as_str(&self) -> String {
        self.uuid.to_string()
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}
impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.uuid.cmp(&other.uuid)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_name = std::any::type_name::<T>();
        let clean_name = full_name.rsplit("::").next().unwrap_or(full_name);
        write!(f, "{}({})", clean_name, self.uuid)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.uuid.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Id::from_uuid(Uuid::deserialize(deserializer)?))
    }
}

#[derive(Debug)]
pub struct ReservationTag;
#[derive(Debug)]
pub struct DelegationTag;
#[derive(Debug)]
pub struct SliceTag;
#[derive(Debug)]
pub struct ActorTag;
#[derive(Debug)]
pub struct UnitTag;
#[derive(Debug)]
pub struct MessageTag;

pub type ReservationId = Id<ReservationTag>;
pub type DelegationId = Id<DelegationTag>;
pub type SliceId = Id<SliceTag>;
pub type ActorId = Id<ActorTag>;
pub type UnitId = Id<UnitTag>;
pub type MessageId = Id<MessageTag>;

/// A generic identifier used where the referent's type is not known
/// statically (e.g. a peer RPC message's `caller_identity`).
pub type Identifier = Id<ActorTag>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_ids_are_unequal() {
        let a: ReservationId = Id::new();
        let b: ReservationId = Id::new();
        assert_ne!(a, b);
    }

    #[test]
    fn stable_string_form_round_trips() {
        let id: ReservationId = Id::new();
        let s = id.as_str();
        let parsed = Uuid::parse_str(&s).unwrap();
        assert_eq!(Id::<ReservationTag>::from_uuid(parsed), id);
    }
}
