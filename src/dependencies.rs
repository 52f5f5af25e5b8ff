use std::fmt::{self, Display};

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::object::{Key, ObjectId};
use crate::ComputationId;

/// Subscribers of one source, in the order they were recorded.
pub(crate) type Subscribers = SmallVec<[ComputationId; 4]>;

/// Something a computation can depend on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
	/// A field of an observed object.
	Field { object: ObjectId, key: Key },
	/// The value of a computed.
	Computed(ComputationId),
}

impl Dependency {
	pub fn field(object: ObjectId, key: impl Into<Key>) -> Self {
		Dependency::Field {
			object,
			key: key.into(),
		}
	}
}

impl Display for Dependency {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Dependency::Field { object, key } => write!(f, "{}.{}", object, key),
			Dependency::Computed(id) => write!(f, "{}", id),
		}
	}
}

/// The dependency graph: object → field → subscribers, plus
/// computed → subscribers for computeds read by other computations.
///
/// Objects are only referenced by id, the store never keeps one alive.
#[derive(Default)]
pub(crate) struct Store {
	fields: FxHashMap<ObjectId, FxHashMap<Key, Subscribers>>,
	computed: FxHashMap<ComputationId, Subscribers>,
}

impl Store {
	/// Adds `id` to the subscribers of `source`. Returns `false` when it was
	/// already there.
	pub fn record(&mut self, source: &Dependency, id: ComputationId) -> bool {
		let subscribers = match source {
			Dependency::Field { object, key } => self
				.fields
				.entry(*object)
				.or_default()
				.entry(key.clone())
				.or_default(),
			Dependency::Computed(computed) => self.computed.entry(*computed).or_default(),
		};

		if subscribers.contains(&id) {
			return false;
		}

		subscribers.push(id);
		true
	}

	pub fn has_target(&self, object: ObjectId) -> bool {
		self.fields.contains_key(&object)
	}

	pub fn field(&self, object: ObjectId, key: &str) -> Subscribers {
		self.fields
			.get(&object)
			.and_then(|fields| fields.get(key))
			.cloned()
			.unwrap_or_default()
	}

	pub fn subscribers(&self, source: &Dependency) -> Subscribers {
		match source {
			Dependency::Field { object, key } => self.field(*object, key),
			Dependency::Computed(computed) => {
				self.computed.get(computed).cloned().unwrap_or_default()
			}
		}
	}

	/// Takes `id` out of the subscribers of `source`, dropping sets and
	/// field maps that end up empty.
	pub fn remove(&mut self, source: &Dependency, id: ComputationId) {
		match source {
			Dependency::Field { object, key } => {
				let Some(fields) = self.fields.get_mut(object) else {
					return;
				};
				if let Some(subscribers) = fields.get_mut(key) {
					subscribers.retain(|s| *s != id);
					if subscribers.is_empty() {
						fields.remove(key);
					}
				}
				if fields.is_empty() {
					self.fields.remove(object);
				}
			}
			Dependency::Computed(computed) => {
				if let Some(subscribers) = self.computed.get_mut(computed) {
					subscribers.retain(|s| *s != id);
					if subscribers.is_empty() {
						self.computed.remove(computed);
					}
				}
			}
		}
	}

	/// Drops everything that listens to `computed` itself.
	pub fn forget_computed(&mut self, computed: ComputationId) {
		self.computed.remove(&computed);
	}

	pub fn forget(&mut self, object: ObjectId) {
		self.fields.remove(&object);
	}
}
