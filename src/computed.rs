use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::computation::Subscriber;
use crate::dependencies::Dependency;
use crate::runtime::RuntimeInner;
use crate::{Computation, Error};

/// A memoized value derived from observed state.
///
/// The body runs on the first [`Computed::get`] and again only after one of
/// the sources it read has changed. Reading a computed from inside another
/// computation makes that computation depend on it.
pub struct Computed<T: Clone + 'static> {
	body: Rc<ComputedBody<T>>,
}

pub(crate) struct ComputedBody<T: Clone + 'static> {
	computation: Computation<T>,
	value: RefCell<Option<T>>,
	dirty: Cell<bool>,
	runtime: Weak<RuntimeInner>,
}

impl<T: Clone + 'static> ComputedBody<T> {
	pub(crate) fn new(computation: Computation<T>, runtime: Weak<RuntimeInner>) -> Self {
		ComputedBody {
			computation,
			value: RefCell::new(None),
			dirty: Cell::new(true),
			runtime,
		}
	}

	fn cached(&self) -> Option<T> {
		self.value.borrow().clone()
	}
}

impl<T: Clone + 'static> Subscriber for ComputedBody<T> {
	fn is_computed(&self) -> bool {
		true
	}

	fn invalidate(&self) -> bool {
		if self.computation.is_stopped() {
			return false;
		}

		if !self.dirty.replace(true) {
			debug!(
				id = %self.computation.id(),
				name = self.computation.name(),
				"computed invalidated"
			);
		}
		true
	}

	/// Readers are reached by the runtime once the computed is stale; the
	/// value itself is recomputed on the next read.
	fn notify(&self) {}

	fn joined(&self, source: Dependency) {
		self.computation.body.joined(source);
	}
}

impl<T: Clone + 'static> Clone for Computed<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T: Clone + 'static> Computed<T> {
	pub(crate) fn from_body(body: Rc<ComputedBody<T>>) -> Self {
		Computed { body }
	}

	/// The underlying memoized, deferred computation. Calling it runs the
	/// body directly and bypasses the cache.
	pub fn computation(&self) -> &Computation<T> {
		&self.body.computation
	}

	/// Current value, recomputed first if a source changed.
	///
	/// When the computed is read from its own body (directly or through
	/// other computeds) the nested read cannot run; it yields the previous
	/// value if there is one and [`Error::Cycle`] otherwise.
	pub fn get(&self) -> Result<T, Error> {
		let body = &self.body;
		let computation = &body.computation;

		if computation.is_stopped() {
			return body.cached().ok_or(Error::Stopped {
				name: computation.name(),
			});
		}

		if let Some(runtime) = body.runtime.upgrade() {
			runtime.link(Dependency::Computed(computation.id()));
		}

		if body.dirty.get() {
			match computation.call() {
				Some(value) => {
					*body.value.borrow_mut() = Some(value);
					body.dirty.set(false);
				}
				None => {
					warn!(
						id = %computation.id(),
						name = computation.name(),
						"computed read while it is being computed"
					);
					return body.cached().ok_or(Error::Cycle {
						name: computation.name(),
					});
				}
			}
		}

		body.cached().ok_or(Error::Cycle {
			name: computation.name(),
		})
	}

	/// The cached value, without computing or tracking anything.
	pub fn peek(&self) -> Option<T> {
		self.body.cached()
	}

	/// `true` until the first read and after every change of a source.
	pub fn is_dirty(&self) -> bool {
		self.body.dirty.get()
	}
}

impl<T> Debug for Computed<T>
where
	T: Clone + Debug + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Computed")
			.field("computation", &self.body.computation)
			.field("dirty", &self.body.dirty.get())
			.field("value", &*self.body.value.borrow())
			.finish()
	}
}
