use super::{ObjectStore, ReferenceState};
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// One indirect object in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub object: Object,
}

/// Objects and trailer introduced by one incremental revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionSnapshot {
    #[serde(default)]
    pub trailer: Dictionary,
    #[serde(default)]
    pub objects: Vec<ObjectEntry>,
}

/// Serialized form of a [`MemoryStore`]. Revisions are listed oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub linearized: bool,
    pub revisions: Vec<RevisionSnapshot>,
}

#[derive(Debug, Clone, Default)]
struct Revision {
    trailer: Dictionary,
    objects: BTreeMap<ObjectId, Object>,
}

/// In-memory object store with incremental revisions.
///
/// Each revision only holds the objects it introduced or replaced; a fetch
/// walks back from the selected revision to the oldest one. Committed values
/// live in a pending table until [`ObjectStore::save_changes`] and are only
/// visible while the store sits on the latest revision.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    /// Oldest first.
    revisions: Vec<Revision>,
    current: usize,
    pending: BTreeMap<ObjectId, Object>,
    reserved: BTreeSet<ObjectId>,
    next_number: u32,
    linearized: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates a store with a single empty revision.
    pub fn new() -> Self {
        Self {
            revisions: vec![Revision::default()],
            current: 0,
            pending: BTreeMap::new(),
            reserved: BTreeSet::new(),
            next_number: 1,
            linearized: false,
        }
    }

    /// Seeds `object` directly into the latest saved revision.
    pub fn insert(&mut self, id: ObjectId, object: Object) {
        self.next_number = self.next_number.max(id.number().saturating_add(1));
        if let Some(latest) = self.revisions.last_mut() {
            latest.objects.insert(id, object);
        }
    }

    /// Points the latest trailer's `/Root` at `catalog`.
    pub fn set_root(&mut self, catalog: ObjectId) {
        if let Some(latest) = self.revisions.last_mut() {
            latest.trailer.set("Root", catalog);
        }
    }

    pub fn set_linearized(&mut self, linearized: bool) {
        self.linearized = linearized;
    }

    /// Starts a new, empty incremental revision on top of the saved ones.
    pub fn push_revision(&mut self) {
        let trailer = self
            .revisions
            .last()
            .map(|revision| revision.trailer.clone())
            .unwrap_or_default();
        self.revisions.push(Revision {
            trailer,
            objects: BTreeMap::new(),
        });
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        if snapshot.revisions.is_empty() {
            return Err(PdfError::MalformedFormat(
                "snapshot contains no revision".to_string(),
            ));
        }

        let mut next_number = 1;
        let revisions = snapshot
            .revisions
            .into_iter()
            .map(|revision| {
                let objects = revision
                    .objects
                    .into_iter()
                    .map(|entry| {
                        next_number = next_number.max(entry.id.number().saturating_add(1));
                        (entry.id, entry.object)
                    })
                    .collect();
                Revision {
                    trailer: revision.trailer,
                    objects,
                }
            })
            .collect();

        Ok(Self {
            revisions,
            current: 0,
            pending: BTreeMap::new(),
            reserved: BTreeSet::new(),
            next_number,
            linearized: snapshot.linearized,
        })
    }

    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_reader(reader)?;
        Self::from_snapshot(snapshot)
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::load(BufReader::new(file))
    }

    /// Snapshot of the saved revisions up to and including `current`.
    fn snapshot_up_to(&self, current: usize) -> Snapshot {
        let visible = self.revisions.len() - current;
        Snapshot {
            linearized: self.linearized,
            revisions: self.revisions[..visible]
                .iter()
                .map(|revision| RevisionSnapshot {
                    trailer: revision.trailer.clone(),
                    objects: revision
                        .objects
                        .iter()
                        .map(|(id, object)| ObjectEntry {
                            id: *id,
                            object: object.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        self.snapshot_up_to(0)
    }

    /// Writes every saved revision. Pending changes are not part of the output.
    pub fn write_snapshot<W: Write>(&self, writer: W) -> Result<()> {
        if self.has_pending_changes() {
            tracing::warn!(
                "writing snapshot with {} unsaved object(s)",
                self.pending.len()
            );
        }
        serde_json::to_writer_pretty(writer, &self.to_snapshot())?;
        Ok(())
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_snapshot(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    fn current_index(&self) -> usize {
        self.revisions.len() - 1 - self.current
    }

    fn is_visible(&self, id: ObjectId) -> bool {
        (self.current == 0 && self.pending.contains_key(&id))
            || self.revisions[..=self.current_index()]
                .iter()
                .any(|revision| revision.objects.contains_key(&id))
    }
}

impl ObjectStore for MemoryStore {
    fn fetch(&self, id: ObjectId) -> Result<Object> {
        if self.current == 0 {
            if let Some(object) = self.pending.get(&id) {
                return Ok(object.clone());
            }
        }

        self.revisions[..=self.current_index()]
            .iter()
            .rev()
            .find_map(|revision| revision.objects.get(&id))
            .cloned()
            .ok_or(PdfError::ObjectNotFound(id))
    }

    fn reserve_reference(&mut self) -> ObjectId {
        let id = ObjectId::new(self.next_number, 0);
        self.next_number = self.next_number.saturating_add(1);
        self.reserved.insert(id);
        tracing::debug!("reserved reference {}", id);
        id
    }

    fn commit(&mut self, id: ObjectId, object: Object) -> Result<()> {
        if self.current != 0 {
            return Err(PdfError::ReadOnlyViolation(format!(
                "cannot commit {id} in revision {}",
                self.current
            )));
        }
        self.reserved.remove(&id);
        self.next_number = self.next_number.max(id.number().saturating_add(1));
        self.pending.insert(id, object);
        Ok(())
    }

    fn reference_state(&self, id: ObjectId) -> ReferenceState {
        if self.reserved.contains(&id) {
            ReferenceState::Reserved
        } else if self.is_visible(id) {
            ReferenceState::Committed
        } else {
            ReferenceState::Free
        }
    }

    fn trailer(&self) -> Result<Dictionary> {
        Ok(self.revisions[self.current_index()].trailer.clone())
    }

    fn is_linearized(&self) -> bool {
        self.linearized
    }

    fn revision(&self) -> usize {
        self.current
    }

    fn revision_count(&self) -> usize {
        self.revisions.len()
    }

    fn change_revision(&mut self, revision: usize) -> Result<()> {
        if revision >= self.revisions.len() {
            return Err(PdfError::InvalidRevision(revision));
        }
        tracing::debug!("store moved from revision {} to {}", self.current, revision);
        self.current = revision;
        Ok(())
    }

    fn save_changes(&mut self, new_revision: bool) -> Result<()> {
        if self.current != 0 {
            return Err(PdfError::ReadOnlyViolation(format!(
                "cannot save while positioned on revision {}",
                self.current
            )));
        }

        let pending = std::mem::take(&mut self.pending);
        if new_revision {
            self.push_revision();
        }
        if let Some(latest) = self.revisions.last_mut() {
            tracing::info!("saving {} changed object(s)", pending.len());
            latest.objects.extend(pending);
        }
        Ok(())
    }

    fn clone_revision(&self, writer: &mut dyn Write) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.snapshot_up_to(self.current))?;
        Ok(())
    }
}
