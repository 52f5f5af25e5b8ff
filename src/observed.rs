use std::fmt::{self, Debug};
use std::rc::Weak;

use crate::object::{FromValue, Key, ObjectId, Value};
use crate::runtime::RuntimeInner;
use crate::{ChangeInfo, Error, Object, Runtime};

/// A reactive view of an [`Object`].
///
/// Reads through it are recorded against the running computation, writes
/// through it re-run everything that read the field. Observing the same
/// object twice gives equal handles.
///
/// The handle points to its runtime weakly. Once the runtime is gone,
/// reads and writes still reach the object but nothing is tracked.
#[derive(Clone)]
pub struct Observed {
	target: Object,
	runtime: Weak<RuntimeInner>,
}

/// Result of a tracked read.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
	Value(Value),
	/// Nested objects come back observed.
	Object(Observed),
}

impl Field {
	pub fn as_bool(&self) -> Option<bool> {
		self.as_value().and_then(Value::as_bool)
	}

	pub fn as_int(&self) -> Option<i64> {
		self.as_value().and_then(Value::as_int)
	}

	pub fn as_float(&self) -> Option<f64> {
		self.as_value().and_then(Value::as_float)
	}

	pub fn as_str(&self) -> Option<&str> {
		self.as_value().and_then(Value::as_str)
	}

	pub fn as_value(&self) -> Option<&Value> {
		match self {
			Field::Value(value) => Some(value),
			Field::Object(_) => None,
		}
	}

	pub fn as_object(&self) -> Option<&Observed> {
		match self {
			Field::Object(observed) => Some(observed),
			Field::Value(_) => None,
		}
	}

	pub fn into_object(self) -> Option<Observed> {
		match self {
			Field::Object(observed) => Some(observed),
			Field::Value(_) => None,
		}
	}

	pub fn into_value(self) -> Value {
		match self {
			Field::Value(value) => value,
			Field::Object(observed) => Value::Object(observed.target),
		}
	}
}

impl From<Field> for Value {
	fn from(field: Field) -> Self {
		field.into_value()
	}
}

impl From<Observed> for Value {
	fn from(observed: Observed) -> Self {
		Value::Object(observed.target)
	}
}

impl Observed {
	pub(crate) fn new(target: Object, runtime: Weak<RuntimeInner>) -> Self {
		Observed { target, runtime }
	}

	#[inline]
	pub fn id(&self) -> ObjectId {
		self.target.id()
	}

	/// The underlying object. Access through it is not tracked.
	pub fn target(&self) -> &Object {
		&self.target
	}

	/// The runtime this handle reports to, if it is still alive.
	pub fn runtime(&self) -> Option<Runtime> {
		self.runtime.upgrade().map(|inner| Runtime { inner })
	}

	/// Reads `key` and records the dependency, even when the field is
	/// missing, so that adding it later re-runs the reader.
	pub fn get(&self, key: &str) -> Option<Field> {
		let value = self.target.get_raw(key);
		if let Some(runtime) = self.runtime.upgrade() {
			runtime.track(&self.target, key);
		}

		value.map(|value| match value {
			Value::Object(object) => Field::Object(Observed::new(object, self.runtime.clone())),
			value => Field::Value(value),
		})
	}

	/// Tracked read of a nested object.
	pub fn object(&self, key: &str) -> Option<Observed> {
		self.get(key).and_then(Field::into_object)
	}

	/// Tracked, typed read. Objects come back raw.
	pub fn get_as<T: FromValue>(&self, key: &str) -> Result<T, Error> {
		let value = self.get(key).ok_or_else(|| Error::Missing { key: key.into() })?;
		let value = value.into_value();
		let found = value.type_name();

		T::from_value(value).ok_or_else(|| Error::TypeMismatch {
			key: key.into(),
			expected: T::TYPE,
			found,
		})
	}

	pub fn contains_key(&self, key: &str) -> bool {
		let contains = self.target.contains_key(key);
		if let Some(runtime) = self.runtime.upgrade() {
			runtime.track(&self.target, key);
		}
		contains
	}

	/// Writes `key` and propagates the change. Every write propagates,
	/// including one that stores an equal value.
	pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
		let key = key.into();
		let new_value = value.into();
		let old_value = self.target.set_raw(key.clone(), new_value.clone());

		let Some(runtime) = self.runtime.upgrade() else {
			return;
		};

		runtime.trigger(
			&self.target,
			&key,
			&ChangeInfo {
				old_value,
				new_value,
			},
		);
	}

	/// Reads `key` untracked, applies `func`, writes the result.
	pub fn update(&self, key: &str, func: impl FnOnce(Option<Value>) -> Value) {
		let next = func(self.target.get_raw(key));
		self.set(key, next);
	}
}

impl PartialEq for Observed {
	fn eq(&self, other: &Self) -> bool {
		self.target == other.target && Weak::ptr_eq(&self.runtime, &other.runtime)
	}
}

impl Debug for Observed {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Observed")
			.field("target", &self.target)
			.finish()
	}
}
