//! External collaborator seam: the object graph.
//!
//! The engine never owns persistence. Everything it needs from the shared
//! object graph (object records, attributes, stored locks, connection
//! details, notification delivery) goes through [`WorldService`], an async
//! trait the embedding server implements against its storage layer. Calls
//! through this seam are the engine's only suspension points.
//!
//! [`InMemoryWorld`] is a complete in-process implementation used by the
//! test suite and by embedders that want a scratch world.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::dbref::ObjRef;
use crate::markup::Markup;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("world unavailable: {0}")]
    Unavailable(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// The four object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ObjectKind {
    Player,
    Thing,
    Room,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub reference: ObjRef,
    pub name: String,
    pub aliases: Vec<String>,
    pub kind: ObjectKind,
    pub owner: ObjRef,
    pub location: Option<ObjRef>,
    pub flags: HashSet<String>,
    pub powers: HashSet<String>,
}

impl ObjectRecord {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f.eq_ignore_ascii_case(flag))
    }

    pub fn has_power(&self, power: &str) -> bool {
        self.powers.iter().any(|p| p.eq_ignore_ascii_case(power))
    }

    pub fn answers_to(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// Last-known connection details for a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub ip: String,
    pub hostname: String,
}

/// Outcome of a name/reference resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Located {
    One(ObjectRecord),
    Ambiguous,
    NotFound,
}

#[async_trait]
pub trait WorldService: Send + Sync {
    /// Fetch an object by reference. A bare reference matches by number; a
    /// qualified one must also agree on creation time.
    async fn object(&self, reference: &ObjRef) -> Result<Option<ObjectRecord>, WorldError>;

    /// Resolve `me`, `here`, `#n`, `*player` or a name as seen by `looker`.
    async fn locate(&self, looker: &ObjRef, name: &str) -> Result<Located, WorldError>;

    async fn contents(&self, reference: &ObjRef) -> Result<Vec<ObjectRecord>, WorldError>;

    async fn attribute(
        &self,
        reference: &ObjRef,
        name: &str,
    ) -> Result<Option<String>, WorldError>;

    async fn set_attribute(
        &self,
        reference: &ObjRef,
        name: &str,
        value: &str,
    ) -> Result<(), WorldError>;

    async fn set_flag(&self, reference: &ObjRef, flag: &str, set: bool)
        -> Result<(), WorldError>;

    /// The stored source string of a named lock (`basic`, `enter`, `use`, ...).
    async fn lock_source(
        &self,
        reference: &ObjRef,
        kind: &str,
    ) -> Result<Option<String>, WorldError>;

    async fn set_lock(
        &self,
        reference: &ObjRef,
        kind: &str,
        source: Option<&str>,
    ) -> Result<(), WorldError>;

    /// Channels the object is joined to.
    async fn channels(&self, reference: &ObjRef) -> Result<Vec<String>, WorldError>;

    /// Last-known connection of a player, if any.
    async fn connection(
        &self,
        reference: &ObjRef,
    ) -> Result<Option<ConnectionInfo>, WorldError>;

    /// Deliver output to an object.
    async fn notify(&self, reference: &ObjRef, message: &Markup) -> Result<(), WorldError>;
}

struct StoredObject {
    record: ObjectRecord,
    attributes: DashMap<String, String>,
    locks: DashMap<String, String>,
    channels: Vec<String>,
    connection: Option<ConnectionInfo>,
}

/// In-process world backed by concurrent maps.
#[derive(Default)]
pub struct InMemoryWorld {
    objects: DashMap<i32, StoredObject>,
    next_number: AtomicI32,
    outbox: DashMap<i32, Vec<String>>,
}

impl InMemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an object owned by `owner`; self-owned when `owner` is `None`
    /// (the bootstrap player case).
    pub fn create(&self, name: &str, kind: ObjectKind, owner: Option<ObjRef>) -> ObjectRecord {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        let reference = ObjRef::qualified(number, Utc::now().timestamp_millis());
        let record = ObjectRecord {
            reference,
            name: name.to_string(),
            aliases: vec![],
            kind,
            owner: owner.unwrap_or(reference),
            location: None,
            flags: HashSet::new(),
            powers: HashSet::new(),
        };
        self.objects.insert(
            number,
            StoredObject {
                record: record.clone(),
                attributes: DashMap::new(),
                locks: DashMap::new(),
                channels: vec![],
                connection: None,
            },
        );
        record
    }

    pub fn move_to(&self, object: &ObjRef, destination: Option<ObjRef>) {
        if let Some(mut stored) = self.objects.get_mut(&object.number) {
            stored.record.location = destination;
        }
    }

    pub fn add_alias(&self, object: &ObjRef, alias: &str) {
        if let Some(mut stored) = self.objects.get_mut(&object.number) {
            stored.record.aliases.push(alias.to_string());
        }
    }

    pub fn give_flag(&self, object: &ObjRef, flag: &str) {
        if let Some(mut stored) = self.objects.get_mut(&object.number) {
            stored.record.flags.insert(flag.to_ascii_uppercase());
        }
    }

    pub fn give_power(&self, object: &ObjRef, power: &str) {
        if let Some(mut stored) = self.objects.get_mut(&object.number) {
            stored.record.powers.insert(power.to_ascii_uppercase());
        }
    }

    pub fn join_channel(&self, object: &ObjRef, channel: &str) {
        if let Some(mut stored) = self.objects.get_mut(&object.number) {
            stored.channels.push(channel.to_string());
        }
    }

    pub fn set_connection(&self, object: &ObjRef, ip: &str, hostname: &str) {
        if let Some(mut stored) = self.objects.get_mut(&object.number) {
            stored.connection = Some(ConnectionInfo {
                ip: ip.to_string(),
                hostname: hostname.to_string(),
            });
        }
    }

    /// Destroy an object and recreate the number for recycling tests.
    pub fn destroy(&self, object: &ObjRef) {
        self.objects.remove(&object.number);
    }

    /// Recreate a destroyed number with a fresh creation time.
    pub fn recycle(&self, number: i32, name: &str, kind: ObjectKind) -> ObjectRecord {
        let reference = ObjRef::qualified(number, Utc::now().timestamp_millis() + 1);
        let record = ObjectRecord {
            reference,
            name: name.to_string(),
            aliases: vec![],
            kind,
            owner: reference,
            location: None,
            flags: HashSet::new(),
            powers: HashSet::new(),
        };
        self.objects.insert(
            number,
            StoredObject {
                record: record.clone(),
                attributes: DashMap::new(),
                locks: DashMap::new(),
                channels: vec![],
                connection: None,
            },
        );
        record
    }

    /// Everything notified to an object, in order. Test inspection hook.
    pub fn sent_to(&self, reference: &ObjRef) -> Vec<String> {
        self.outbox
            .get(&reference.number)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn fetch(&self, reference: &ObjRef) -> Option<ObjectRecord> {
        self.objects.get(&reference.number).and_then(|stored| {
            if reference.matches(&stored.record.reference) {
                Some(stored.record.clone())
            } else {
                None
            }
        })
    }
}

#[async_trait]
impl WorldService for InMemoryWorld {
    async fn object(&self, reference: &ObjRef) -> Result<Option<ObjectRecord>, WorldError> {
        Ok(self.fetch(reference))
    }

    async fn locate(&self, looker: &ObjRef, name: &str) -> Result<Located, WorldError> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("me") {
            return Ok(match self.fetch(looker) {
                Some(record) => Located::One(record),
                None => Located::NotFound,
            });
        }
        if name.eq_ignore_ascii_case("here") {
            let location = self.fetch(looker).and_then(|r| r.location);
            return Ok(match location.and_then(|l| self.fetch(&l)) {
                Some(record) => Located::One(record),
                None => Located::NotFound,
            });
        }
        if let Ok(reference) = name.parse::<ObjRef>() {
            return Ok(match self.fetch(&reference) {
                Some(record) => Located::One(record),
                None => Located::NotFound,
            });
        }
        if let Some(player_name) = name.strip_prefix('*') {
            let matches: Vec<ObjectRecord> = self
                .objects
                .iter()
                .filter(|entry| {
                    entry.record.kind == ObjectKind::Player
                        && entry.record.answers_to(player_name)
                })
                .map(|entry| entry.record.clone())
                .collect();
            return Ok(match matches.len() {
                0 => Located::NotFound,
                1 => Located::One(matches.into_iter().next().unwrap()),
                _ => Located::Ambiguous,
            });
        }

        // Nearby match: the looker itself, what it carries, what shares its
        // location.
        let mut nearby: Vec<ObjectRecord> = Vec::new();
        if let Some(me) = self.fetch(looker) {
            let location = me.location;
            nearby.push(me);
            for entry in self.objects.iter() {
                let record = &entry.record;
                if record.reference.number == looker.number {
                    continue;
                }
                let held = record.location == Some(*looker);
                let adjacent = location.is_some() && record.location == location;
                if held || adjacent {
                    nearby.push(record.clone());
                }
            }
        }
        let matches: Vec<ObjectRecord> = nearby
            .into_iter()
            .filter(|record| record.answers_to(name))
            .collect();
        Ok(match matches.len() {
            0 => Located::NotFound,
            1 => Located::One(matches.into_iter().next().unwrap()),
            _ => Located::Ambiguous,
        })
    }

    async fn contents(&self, reference: &ObjRef) -> Result<Vec<ObjectRecord>, WorldError> {
        Ok(self
            .objects
            .iter()
            .filter(|entry| entry.record.location == Some(*reference))
            .map(|entry| entry.record.clone())
            .collect())
    }

    async fn attribute(
        &self,
        reference: &ObjRef,
        name: &str,
    ) -> Result<Option<String>, WorldError> {
        Ok(self.objects.get(&reference.number).and_then(|stored| {
            stored
                .attributes
                .get(&name.to_ascii_uppercase())
                .map(|v| v.clone())
        }))
    }

    async fn set_attribute(
        &self,
        reference: &ObjRef,
        name: &str,
        value: &str,
    ) -> Result<(), WorldError> {
        if let Some(stored) = self.objects.get(&reference.number) {
            stored
                .attributes
                .insert(name.to_ascii_uppercase(), value.to_string());
        }
        Ok(())
    }

    async fn set_flag(
        &self,
        reference: &ObjRef,
        flag: &str,
        set: bool,
    ) -> Result<(), WorldError> {
        if let Some(mut stored) = self.objects.get_mut(&reference.number) {
            let flag = flag.to_ascii_uppercase();
            if set {
                stored.record.flags.insert(flag);
            } else {
                stored.record.flags.remove(&flag);
            }
        }
        Ok(())
    }

    async fn lock_source(
        &self,
        reference: &ObjRef,
        kind: &str,
    ) -> Result<Option<String>, WorldError> {
        Ok(self.objects.get(&reference.number).and_then(|stored| {
            stored
                .locks
                .get(&kind.to_ascii_lowercase())
                .map(|v| v.clone())
        }))
    }

    async fn set_lock(
        &self,
        reference: &ObjRef,
        kind: &str,
        source: Option<&str>,
    ) -> Result<(), WorldError> {
        if let Some(stored) = self.objects.get(&reference.number) {
            let kind = kind.to_ascii_lowercase();
            match source {
                Some(source) => {
                    stored.locks.insert(kind, source.to_string());
                }
                None => {
                    stored.locks.remove(&kind);
                }
            }
        }
        Ok(())
    }

    async fn channels(&self, reference: &ObjRef) -> Result<Vec<String>, WorldError> {
        Ok(self
            .objects
            .get(&reference.number)
            .map(|stored| stored.channels.clone())
            .unwrap_or_default())
    }

    async fn connection(
        &self,
        reference: &ObjRef,
    ) -> Result<Option<ConnectionInfo>, WorldError> {
        Ok(self
            .objects
            .get(&reference.number)
            .and_then(|stored| stored.connection.clone()))
    }

    async fn notify(&self, reference: &ObjRef, message: &Markup) -> Result<(), WorldError> {
        self.outbox
            .entry(reference.number)
            .or_default()
            .push(message.plain_text());
        Ok(())
    }
}
