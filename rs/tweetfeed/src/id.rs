use std::fmt;
use std::num::NonZeroU32;

use parking_lot::RwLock;

use crate::Error;

const SLOT_BITS: u32 = 16;
const SLOT_MASK: u32 = (1 << SLOT_BITS) - 1;
const GENERATION_BITS: u32 = 14;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const KIND_SHIFT: u32 = SLOT_BITS + GENERATION_BITS;

/// The kind of resource a handle refers to.
///
/// Encoded in the handle so a stream handle never resolves to a context and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
	Context,
	Stream,
}

impl Kind {
	fn bit(self) -> u32 {
		match self {
			Self::Context => 0,
			Self::Stream => 1,
		}
	}
}

/// An opaque handle handed across the C boundary.
///
/// Always a positive `i32`: bit 30 is the [Kind], the next 14 bits are the slot generation
/// (never zero), and the low 16 bits are the slot index.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(NonZeroU32);

impl Id {
	fn new(kind: Kind, slot: usize, generation: u32) -> Result<Self, Error> {
		let slot = u32::try_from(slot).map_err(|_| Error::Exhausted)?;
		if slot > SLOT_MASK || generation == 0 || generation > GENERATION_MASK {
			return Err(Error::Exhausted);
		}

		let raw = (kind.bit() << KIND_SHIFT) | (generation << SLOT_BITS) | slot;
		// generation is non-zero, so raw is too.
		NonZeroU32::new(raw).map(Self).ok_or(Error::Exhausted)
	}

	pub fn kind(&self) -> Kind {
		match self.0.get() >> KIND_SHIFT {
			0 => Kind::Context,
			_ => Kind::Stream,
		}
	}

	fn slot(&self) -> usize {
		(self.0.get() & SLOT_MASK) as usize
	}

	fn generation(&self) -> u32 {
		(self.0.get() >> SLOT_BITS) & GENERATION_MASK
	}
}

impl fmt::Debug for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}({}@{})", self.kind(), self.slot(), self.generation())
	}
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl TryFrom<i32> for Id {
	type Error = Error;

	fn try_from(raw: i32) -> Result<Self, Self::Error> {
		let raw = u32::try_from(raw).map_err(|_| Error::InvalidHandle)?;
		let id = NonZeroU32::new(raw).map(Self).ok_or(Error::InvalidHandle)?;
		if id.generation() == 0 {
			return Err(Error::InvalidHandle);
		}
		Ok(id)
	}
}

impl From<Id> for i32 {
	fn from(id: Id) -> Self {
		// Bit 31 is never set.
		id.0.get() as i32
	}
}

enum Entry<T> {
	Live { generation: u32, value: T },
	// The generation counter ran out; this slot is never handed out again.
	Retired,
}

struct Slots<T> {
	entries: slab::Slab<Entry<T>>,

	// The next generation for each slot index, kept after the slab entry is vacated.
	generations: Vec<u32>,
}

/// A process-wide table mapping handles to shared resources.
///
/// Lookups take a shared lock, insertion and removal take the exclusive lock,
/// so a lookup never observes a resource halfway through removal.
pub struct HandleTable<T> {
	kind: Kind,
	slots: RwLock<Slots<T>>,
}

impl<T: Clone> HandleTable<T> {
	pub fn new(kind: Kind) -> Self {
		Self {
			kind,
			slots: RwLock::new(Slots {
				entries: slab::Slab::new(),
				generations: Vec::new(),
			}),
		}
	}

	pub fn insert(&self, value: T) -> Result<Id, Error> {
		let mut slots = self.slots.write();

		let slot = slots.entries.vacant_key();
		if slot >= slots.generations.len() {
			slots.generations.resize(slot + 1, 1);
		}

		let generation = slots.generations[slot];
		let id = Id::new(self.kind, slot, generation)?;

		slots.entries.insert(Entry::Live { generation, value });
		Ok(id)
	}

	pub fn get(&self, id: Id) -> Result<T, Error> {
		if id.kind() != self.kind {
			return Err(Error::InvalidHandle);
		}

		let slots = self.slots.read();
		match slots.entries.get(id.slot()) {
			Some(Entry::Live { generation, value }) if *generation == id.generation() => Ok(value.clone()),
			_ => Err(Error::InvalidHandle),
		}
	}

	pub fn remove(&self, id: Id) -> Result<T, Error> {
		if id.kind() != self.kind {
			return Err(Error::InvalidHandle);
		}

		let mut slots = self.slots.write();
		match slots.entries.get(id.slot()) {
			Some(Entry::Live { generation, .. }) if *generation == id.generation() => {}
			_ => return Err(Error::InvalidHandle),
		}

		let next = id.generation() + 1;
		let entry = if next > GENERATION_MASK {
			tracing::debug!(slot = id.slot(), "retiring handle slot");
			std::mem::replace(&mut slots.entries[id.slot()], Entry::Retired)
		} else {
			slots.generations[id.slot()] = next;
			slots.entries.remove(id.slot())
		};

		match entry {
			Entry::Live { value, .. } => Ok(value),
			Entry::Retired => Err(Error::InvalidHandle),
		}
	}

	/// The number of live resources.
	pub fn len(&self) -> usize {
		self.slots
			.read()
			.entries
			.iter()
			.filter(|(_, entry)| matches!(entry, Entry::Live { .. }))
			.count()
	}
}
