/// Errors surfaced by reactive reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// A computed was read while its own body was running.
	#[error("computed `{name}` was read while it was being computed")]
	Cycle { name: &'static str },

	/// A stopped computed was read before it ever produced a value.
	#[error("computed `{name}` is stopped")]
	Stopped { name: &'static str },

	#[error("field `{key}` is missing")]
	Missing { key: String },

	#[error("field `{key}` holds {found}, expected {expected}")]
	TypeMismatch {
		key: String,
		expected: &'static str,
		found: &'static str,
	},
}
