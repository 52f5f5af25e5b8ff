use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Display};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::debug;

use crate::dependencies::Dependency;
use crate::runtime::RuntimeInner;

/// Stable handle of a computation inside its runtime.
///
/// Arena slots are reused after [`Computation::stop`]; the generation keeps
/// an id of a stopped computation from matching its successor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComputationId {
	index: usize,
	generation: u32,
}

impl ComputationId {
	pub(crate) const fn new(index: usize, generation: u32) -> Self {
		ComputationId { index, generation }
	}

	#[inline]
	pub(crate) fn index(&self) -> usize {
		self.index
	}

	#[inline]
	pub(crate) fn generation(&self) -> u32 {
		self.generation
	}
}

impl Display for ComputationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.generation == 0 {
			write!(f, "#{}", self.index)
		} else {
			write!(f, "#{}.{}", self.index, self.generation)
		}
	}
}

/// How a computation is scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EffectOptions {
	/// Memoized computations run after plain ones on propagation.
	pub computed: bool,
	/// Deferred start: no initial run on registration.
	pub lazy: bool,
	/// Label used in logs.
	pub name: &'static str,
}

impl Default for EffectOptions {
	fn default() -> Self {
		EffectOptions {
			computed: false,
			lazy: false,
			name: "<unnamed>",
		}
	}
}

impl EffectOptions {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn computed(mut self) -> Self {
		self.computed = true;
		self
	}

	#[must_use]
	pub fn lazy(mut self) -> Self {
		self.lazy = true;
		self
	}

	#[must_use]
	pub fn named(mut self, name: &'static str) -> Self {
		self.name = name;
		self
	}
}

/// What the runtime keeps in its arena and runs on propagation.
pub(crate) trait Subscriber {
	fn is_computed(&self) -> bool;

	/// Marks a cached value stale without running user code. Returns `true`
	/// when the subscriber caches, so its own readers must be reached too.
	fn invalidate(&self) -> bool {
		false
	}

	/// A source this subscriber depends on changed.
	fn notify(&self);

	/// `source` now lists this subscriber.
	fn joined(&self, source: Dependency);
}

/// A re-runnable unit of work registered with a runtime.
///
/// The handle is the identity: clones refer to the same computation and
/// compare equal.
pub struct Computation<T> {
	pub(crate) body: Rc<ComputationBody<T>>,
}

pub(crate) struct ComputationBody<T> {
	id: ComputationId,
	options: EffectOptions,
	func: Box<dyn Fn() -> T>,
	dependencies: RefCell<SmallVec<[Dependency; 4]>>,
	stopped: Cell<bool>,
	runtime: Weak<RuntimeInner>,
}

impl<T> ComputationBody<T> {
	pub(crate) fn new(
		id: ComputationId,
		options: EffectOptions,
		func: Box<dyn Fn() -> T>,
		runtime: Weak<RuntimeInner>,
	) -> Self {
		ComputationBody {
			id,
			options,
			func,
			dependencies: RefCell::new(SmallVec::new()),
			stopped: Cell::new(false),
			runtime,
		}
	}

	fn call(&self) -> Option<T> {
		if self.stopped.get() {
			return None;
		}

		let runtime = self.runtime.upgrade()?;
		runtime.run(self.id, || (self.func)())
	}
}

impl<T> Subscriber for ComputationBody<T> {
	fn is_computed(&self) -> bool {
		self.options.computed
	}

	fn notify(&self) {
		let _ = self.call();
	}

	fn joined(&self, source: Dependency) {
		self.dependencies.borrow_mut().push(source);
	}
}

impl<T> Clone for Computation<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> PartialEq for Computation<T> {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.body, &other.body)
	}
}

impl<T> Eq for Computation<T> {}

impl<T> Computation<T> {
	pub(crate) fn from_body(body: Rc<ComputationBody<T>>) -> Self {
		Computation { body }
	}

	/// Runs the body under tracking. `None` when the computation is already
	/// running further up the stack, or has been stopped.
	pub fn call(&self) -> Option<T> {
		self.body.call()
	}

	#[inline]
	pub fn id(&self) -> ComputationId {
		self.body.id
	}

	pub fn name(&self) -> &'static str {
		self.body.options.name
	}

	pub fn options(&self) -> EffectOptions {
		self.body.options
	}

	pub fn is_computed(&self) -> bool {
		self.body.options.computed
	}

	pub fn is_lazy(&self) -> bool {
		self.body.options.lazy
	}

	pub fn is_stopped(&self) -> bool {
		self.body.stopped.get()
	}

	/// Sources this computation has subscribed to, in order.
	pub fn dependencies(&self) -> Vec<Dependency> {
		self.body.dependencies.borrow().to_vec()
	}

	pub fn dependency_count(&self) -> usize {
		self.body.dependencies.borrow().len()
	}

	/// Leaves every dependency set and releases the runtime's reference.
	/// Later calls and notifications do nothing.
	pub fn stop(&self) {
		if self.body.stopped.replace(true) {
			return;
		}

		let dependencies = std::mem::take(&mut *self.body.dependencies.borrow_mut());
		if let Some(runtime) = self.body.runtime.upgrade() {
			runtime.detach(self.body.id, &dependencies);
		}

		debug!(id = %self.body.id, name = self.body.options.name, "computation stopped");
	}
}

impl<T> Debug for Computation<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Computation")
			.field("id", &self.body.id)
			.field("name", &self.body.options.name)
			.field("computed", &self.body.options.computed)
			.field("lazy", &self.body.options.lazy)
			.finish()
	}
}
