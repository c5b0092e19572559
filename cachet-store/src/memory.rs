//! In-process backing store.
//!
//! A single mutex around the whole keyspace makes every operation - and in
//! particular [`run_atomic`](crate::CacheStore::run_atomic) - trivially
//! indivisible. Expired entries are dropped lazily on access. Intended for
//! tests and single-process deployments.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{CacheError, CachetResult};
use tokio::time::Instant;

use crate::atomic::{AtomicOp, AtomicWrite};
use crate::traits::CacheStore;

#[derive(Debug, Clone)]
enum Slot {
    Scalar(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Slot::Scalar(_) => "scalar",
            Slot::Hash(_) => "hash",
            Slot::Set(_) => "set",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(deadline) => now < deadline,
            None => true,
        }
    }
}

type Keyspace = HashMap<String, Entry>;

/// In-memory [`CacheStore`] with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Keyspace>,
}

fn wrong_kind(key: &str, wanted: &str, got: &str) -> CacheError {
    CacheError::Corrupt {
        key: key.to_string(),
        reason: format!("expected {wanted} value, found {got}"),
    }
}

/// Drop the entry if expired, then hand back a live reference.
fn live_entry<'a>(entries: &'a mut Keyspace, key: &str, now: Instant) -> Option<&'a Entry> {
    if let Some(entry) = entries.get(key) {
        if !entry.live(now) {
            entries.remove(key);
            return None;
        }
    }
    entries.get(key)
}

fn apply(entries: &mut Keyspace, op: &AtomicOp, now: Instant) -> Result<(), CacheError> {
    match op {
        AtomicOp::Set { key, value, ttl } => {
            entries.insert(
                key.clone(),
                Entry {
                    slot: Slot::Scalar(value.clone()),
                    expires_at: ttl.map(|t| now + t),
                },
            );
        }
        AtomicOp::SetIfAbsent { key, value, ttl } => {
            if live_entry(entries, key, now).is_none() {
                entries.insert(
                    key.clone(),
                    Entry {
                        slot: Slot::Scalar(value.clone()),
                        expires_at: ttl.map(|t| now + t),
                    },
                );
            }
        }
        AtomicOp::Delete { key } => {
            entries.remove(key);
        }
        AtomicOp::Expire { key, ttl } => {
            if live_entry(entries, key, now).is_some() {
                if let Some(entry) = entries.get_mut(key) {
                    entry.expires_at = Some(now + *ttl);
                }
            }
        }
        AtomicOp::HashSet { key, field, value } => {
            hash_mut(entries, key, now)?.insert(field.clone(), value.clone());
        }
        AtomicOp::HashDelete { key, field } => {
            if live_entry(entries, key, now).is_some() {
                hash_mut(entries, key, now)?.remove(field);
            }
        }
        AtomicOp::SetAdd { key, member } => {
            set_mut(entries, key, now)?.insert(member.clone());
        }
        AtomicOp::SetRemove { key, member } => {
            if live_entry(entries, key, now).is_some() {
                set_mut(entries, key, now)?.remove(member);
            }
        }
        AtomicOp::QueryEvict {
            reverse_key,
            member,
            multiple,
            placeholder,
        } => {
            let prior = match live_entry(entries, reverse_key, now) {
                Some(Entry {
                    slot: Slot::Hash(fields),
                    ..
                }) => fields.get(member).cloned(),
                Some(entry) => return Err(wrong_kind(reverse_key, "hash", entry.slot.kind())),
                None => None,
            };
            if let Some(result_key) = prior {
                if *multiple {
                    let members = set_mut(entries, &result_key, now)?;
                    members.remove(member);
                    if members.is_empty() {
                        members.insert(placeholder.clone());
                    }
                } else {
                    apply(
                        entries,
                        &AtomicOp::Set {
                            key: result_key,
                            value: placeholder.clone(),
                            ttl: None,
                        },
                        now,
                    )?;
                }
                hash_mut(entries, reverse_key, now)?.remove(member);
            }
        }
        AtomicOp::QueryAssign {
            reverse_key,
            member,
            result_key,
            multiple,
            placeholder,
        } => {
            if *multiple {
                let cached = match live_entry(entries, result_key, now) {
                    Some(Entry {
                        slot: Slot::Set(_),
                        ..
                    }) => true,
                    Some(entry) => {
                        return Err(wrong_kind(result_key, "set", entry.slot.kind()))
                    }
                    None => false,
                };
                if cached {
                    let members = set_mut(entries, result_key, now)?;
                    members.remove(placeholder);
                    members.insert(member.clone());
                    hash_mut(entries, reverse_key, now)?
                        .insert(member.clone(), result_key.clone());
                }
            } else {
                apply(
                    entries,
                    &AtomicOp::Set {
                        key: result_key.clone(),
                        value: member.clone(),
                        ttl: None,
                    },
                    now,
                )?;
                hash_mut(entries, reverse_key, now)?.insert(member.clone(), result_key.clone());
            }
        }
    }
    Ok(())
}

/// Mutable hash slot at `key`, creating it when absent.
fn hash_mut<'a>(
    entries: &'a mut Keyspace,
    key: &str,
    now: Instant,
) -> Result<&'a mut HashMap<String, String>, CacheError> {
    live_entry(entries, key, now);
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        slot: Slot::Hash(HashMap::new()),
        expires_at: None,
    });
    match &mut entry.slot {
        Slot::Hash(fields) => Ok(fields),
        other => Err(wrong_kind(key, "hash", other.kind())),
    }
}

/// Mutable set slot at `key`, creating it when absent.
fn set_mut<'a>(
    entries: &'a mut Keyspace,
    key: &str,
    now: Instant,
) -> Result<&'a mut HashSet<String>, CacheError> {
    live_entry(entries, key, now);
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        slot: Slot::Set(HashSet::new()),
        expires_at: None,
    });
    match &mut entry.slot {
        Slot::Set(members) => Ok(members),
        other => Err(wrong_kind(key, "set", other.kind())),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CachetResult<std::sync::MutexGuard<'_, Keyspace>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::LockPoisoned.into())
    }

    /// Number of live entries; test and diagnostics helper.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CachetResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        match live_entry(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Scalar(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(entry) => Err(wrong_kind(key, "scalar", entry.slot.kind()).into()),
            None => Ok(None),
        }
    }

    async fn m_get(&self, keys: &[String]) -> CachetResult<Vec<Option<String>>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            match live_entry(&mut entries, key, now) {
                Some(Entry {
                    slot: Slot::Scalar(value),
                    ..
                }) => out.push(Some(value.clone())),
                Some(entry) => return Err(wrong_kind(key, "scalar", entry.slot.kind()).into()),
                None => out.push(None),
            }
        }
        Ok(out)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CachetResult<()> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        apply(
            &mut entries,
            &AtomicOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
            now,
        )?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CachetResult<bool> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        if live_entry(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        apply(
            &mut entries,
            &AtomicOp::Set {
                key: key.to_string(),
                value: value.to_string(),
                ttl,
            },
            now,
        )?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CachetResult<()> {
        let mut entries = self.lock()?;
        entries.remove(key);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> CachetResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        match live_entry(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Hash(fields),
                ..
            }) => Ok(fields.get(field).cloned()),
            Some(entry) => Err(wrong_kind(key, "hash", entry.slot.kind()).into()),
            None => Ok(None),
        }
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> CachetResult<()> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        hash_mut(&mut entries, key, now)?.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> CachetResult<()> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        if live_entry(&mut entries, key, now).is_some() {
            hash_mut(&mut entries, key, now)?.remove(field);
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, members: &[String]) -> CachetResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.lock()?;
        let slot = set_mut(&mut entries, key, now)?;
        for member in members {
            slot.insert(member.clone());
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> CachetResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.lock()?;
        if live_entry(&mut entries, key, now).is_some() {
            let slot = set_mut(&mut entries, key, now)?;
            for member in members {
                slot.remove(member);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> CachetResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        match live_entry(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(entry) => Err(wrong_kind(key, "set", entry.slot.kind()).into()),
            None => Ok(Vec::new()),
        }
    }

    async fn set_len(&self, key: &str) -> CachetResult<u64> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        match live_entry(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Set(members),
                ..
            }) => Ok(members.len() as u64),
            Some(entry) => Err(wrong_kind(key, "set", entry.slot.kind()).into()),
            None => Ok(0),
        }
    }

    async fn run_atomic(&self, write: AtomicWrite) -> CachetResult<()> {
        if write.is_empty() {
            return Ok(());
        }
        let now = Instant::now();
        let mut entries = self.lock()?;
        // Apply against a copy and commit on success, so a mid-batch error
        // leaves no partial effect.
        let mut staged = entries.clone();
        for op in write.ops() {
            apply(&mut staged, op, now)?;
        }
        *entries = staged;
        Ok(())
    }
}
