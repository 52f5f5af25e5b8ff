use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::runtime::RuntimeInner;

/// Field name inside an [`Object`].
pub type Key = Rc<str>;

/// Stable identity of an [`Object`]. Identifiers are never reused,
/// so the dependency store can key on them without holding the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
	fn next() -> Self {
		static COUNTER: AtomicU64 = AtomicU64::new(0);
		ObjectId(COUNTER.fetch_add(1, Ordering::Relaxed))
	}
}

impl Display for ObjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "@{}", self.0)
	}
}

/// A value stored in a field of an [`Object`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(Rc<str>),
	Object(Object),
}

impl Value {
	pub fn type_name(&self) -> &'static str {
		match self {
			Value::Null => "null",
			Value::Bool(_) => "bool",
			Value::Int(_) => "int",
			Value::Float(_) => "float",
			Value::Str(_) => "string",
			Value::Object(_) => "object",
		}
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Value::Bool(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Value::Int(value) => Some(*value),
			_ => None,
		}
	}

	pub fn as_float(&self) -> Option<f64> {
		match self {
			Value::Float(value) => Some(*value),
			Value::Int(value) => Some(*value as f64),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&Object> {
		match self {
			Value::Object(object) => Some(object),
			_ => None,
		}
	}
}

impl From<bool> for Value {
	fn from(value: bool) -> Self {
		Value::Bool(value)
	}
}

impl From<i64> for Value {
	fn from(value: i64) -> Self {
		Value::Int(value)
	}
}

impl From<i32> for Value {
	fn from(value: i32) -> Self {
		Value::Int(value.into())
	}
}

impl From<f64> for Value {
	fn from(value: f64) -> Self {
		Value::Float(value)
	}
}

impl From<&str> for Value {
	fn from(value: &str) -> Self {
		Value::Str(value.into())
	}
}

impl From<String> for Value {
	fn from(value: String) -> Self {
		Value::Str(value.into())
	}
}

impl From<Rc<str>> for Value {
	fn from(value: Rc<str>) -> Self {
		Value::Str(value)
	}
}

impl From<Object> for Value {
	fn from(object: Object) -> Self {
		Value::Object(object)
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(value: Option<T>) -> Self {
		value.map_or(Value::Null, Into::into)
	}
}

/// Conversion out of a [`Value`] used by typed field access.
pub trait FromValue: Sized {
	const TYPE: &'static str;

	fn from_value(value: Value) -> Option<Self>;
}

impl FromValue for Value {
	const TYPE: &'static str = "value";

	fn from_value(value: Value) -> Option<Self> {
		Some(value)
	}
}

impl FromValue for bool {
	const TYPE: &'static str = "bool";

	fn from_value(value: Value) -> Option<Self> {
		value.as_bool()
	}
}

impl FromValue for i64 {
	const TYPE: &'static str = "int";

	fn from_value(value: Value) -> Option<Self> {
		value.as_int()
	}
}

impl FromValue for f64 {
	const TYPE: &'static str = "float";

	fn from_value(value: Value) -> Option<Self> {
		value.as_float()
	}
}

impl FromValue for Rc<str> {
	const TYPE: &'static str = "string";

	fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Str(value) => Some(value),
			_ => None,
		}
	}
}

impl FromValue for String {
	const TYPE: &'static str = "string";

	fn from_value(value: Value) -> Option<Self> {
		value.as_str().map(str::to_owned)
	}
}

impl FromValue for Object {
	const TYPE: &'static str = "object";

	fn from_value(value: Value) -> Option<Self> {
		match value {
			Value::Object(object) => Some(object),
			_ => None,
		}
	}
}

/// A plain key-value record with reference identity.
///
/// Cloning an `Object` clones the handle, not the record. Reads and writes
/// through `get_raw`/`set_raw` are invisible to the reactive runtime; wrap
/// the object with [`crate::observe`] to have them tracked.
#[derive(Clone, Default)]
pub struct Object {
	body: Rc<ObjectBody>,
}

struct ObjectBody {
	id: ObjectId,
	fields: RefCell<BTreeMap<Key, Value>>,
	watchers: RefCell<SmallVec<[Weak<RuntimeInner>; 1]>>,
}

impl Default for ObjectBody {
	fn default() -> Self {
		ObjectBody {
			id: ObjectId::next(),
			fields: RefCell::new(BTreeMap::new()),
			watchers: RefCell::new(SmallVec::new()),
		}
	}
}

impl Drop for ObjectBody {
	fn drop(&mut self) {
		for runtime in self.watchers.get_mut().drain(..) {
			if let Some(runtime) = runtime.upgrade() {
				runtime.forget(self.id);
			}
		}
	}
}

impl Object {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style insert, handy for literals.
	#[must_use]
	pub fn with(self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
		self.set_raw(key, value);
		self
	}

	#[inline]
	pub fn id(&self) -> ObjectId {
		self.body.id
	}

	pub fn get_raw(&self, key: &str) -> Option<Value> {
		self.body.fields.borrow().get(key).cloned()
	}

	/// Writes without notifying anyone. Returns the previous value.
	pub fn set_raw(&self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
		self.body
			.fields
			.borrow_mut()
			.insert(key.into(), value.into())
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.body.fields.borrow().contains_key(key)
	}

	pub fn keys(&self) -> Vec<Key> {
		self.body.fields.borrow().keys().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.body.fields.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.body.fields.borrow().is_empty()
	}

	pub fn ptr_eq(&self, other: &Object) -> bool {
		Rc::ptr_eq(&self.body, &other.body)
	}

	/// Remembers a runtime that holds dependencies on this object so it can
	/// be told to drop them when the object goes away.
	pub(crate) fn watched_by(&self, runtime: &Weak<RuntimeInner>) {
		let mut watchers = self.body.watchers.borrow_mut();
		if !watchers.iter().any(|w| w.ptr_eq(runtime)) {
			watchers.push(runtime.clone());
		}
	}
}

impl PartialEq for Object {
	fn eq(&self, other: &Self) -> bool {
		self.ptr_eq(other)
	}
}

impl<K, V> FromIterator<(K, V)> for Object
where
	K: Into<Key>,
	V: Into<Value>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let object = Object::new();
		for (key, value) in iter {
			object.set_raw(key, value);
		}
		object
	}
}

impl Debug for Object {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.body.fields.try_borrow() {
			Ok(fields) => f
				.debug_struct("Object")
				.field("id", &self.id())
				.field("fields", &*fields)
				.finish(),
			Err(_) => f.debug_struct("Object").field("id", &self.id()).finish(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_survives_clone() {
		let a = Object::new().with("x", 1);
		let b = a.clone();
		assert_eq!(a, b);
		assert_eq!(a.id(), b.id());
		assert_ne!(a, Object::new().with("x", 1));
	}

	#[test]
	fn raw_access() {
		let object: Object = [("a", 1), ("b", 2)].into_iter().collect();
		assert_eq!(object.get_raw("a"), Some(Value::Int(1)));
		assert_eq!(object.set_raw("a", "one"), Some(Value::Int(1)));
		assert_eq!(object.get_raw("a").as_ref().and_then(Value::as_str), Some("one"));
		assert_eq!(object.keys().len(), 2);
		assert_eq!(object.get_raw("missing"), None);
	}

	#[test]
	fn typed_conversion() {
		assert_eq!(i64::from_value(Value::Int(3)), Some(3));
		assert_eq!(i64::from_value(Value::Bool(true)), None);
		assert_eq!(f64::from_value(Value::Int(2)), Some(2.0));
		assert_eq!(Value::from(None::<i64>), Value::Null);
	}
}
