use std::cell::RefCell;
use std::rc::{Rc, Weak};

use fxhash::FxHashSet;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::computation::{ComputationBody, Subscriber};
use crate::computed::ComputedBody;
use crate::dependencies::{Dependency, Store, Subscribers};
use crate::object::Value;
use crate::{Computation, ComputationId, Computed, EffectOptions, Object, Observed};

thread_local! {
	static RUNTIME: Runtime = Runtime::new();
}

/// Old and new value of a field write, handed to [`Runtime::trigger`].
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeInfo {
	pub old_value: Option<Value>,
	pub new_value: Value,
}

/// An independent reactive engine: the tracking stack, the computation
/// arena and the dependency store.
///
/// Cloning gives another handle to the same engine. [`Observed`] handles and
/// computations only point back weakly, so the engine is freed with its
/// last `Runtime`. Nothing here is `Send`; each thread that uses the free
/// functions gets its own default runtime.
#[derive(Clone)]
pub struct Runtime {
	pub(crate) inner: Rc<RuntimeInner>,
}

/// `None` frames come from [`Runtime::untrack`] and hide everything below.
type Frame = Option<ComputationId>;

pub(crate) struct RuntimeInner {
	stack: RefCell<SmallVec<[Frame; 8]>>,
	arena: RefCell<Arena>,
	store: RefCell<Store>,
	this: Weak<RuntimeInner>,
}

struct Slot {
	generation: u32,
	subscriber: Option<Rc<dyn Subscriber>>,
}

/// Computations by index. Released slots go to `free` with a bumped
/// generation.
#[derive(Default)]
struct Arena {
	slots: Vec<Slot>,
	free: Vec<usize>,
}

impl Arena {
	fn reserve(&mut self) -> ComputationId {
		if let Some(index) = self.free.pop() {
			if let Some(slot) = self.slots.get(index) {
				return ComputationId::new(index, slot.generation);
			}
		}

		self.slots.push(Slot {
			generation: 0,
			subscriber: None,
		});
		ComputationId::new(self.slots.len() - 1, 0)
	}

	fn slot_mut(&mut self, id: ComputationId) -> Option<&mut Slot> {
		self.slots
			.get_mut(id.index())
			.filter(|slot| slot.generation == id.generation())
	}

	fn install(&mut self, id: ComputationId, subscriber: Rc<dyn Subscriber>) {
		if let Some(slot) = self.slot_mut(id) {
			slot.subscriber = Some(subscriber);
		}
	}

	fn get(&self, id: ComputationId) -> Option<Rc<dyn Subscriber>> {
		self.slots
			.get(id.index())
			.filter(|slot| slot.generation == id.generation())
			.and_then(|slot| slot.subscriber.clone())
	}

	fn release(&mut self, id: ComputationId) -> Option<Rc<dyn Subscriber>> {
		let slot = self.slot_mut(id)?;
		let released = slot.subscriber.take();
		slot.generation = slot.generation.wrapping_add(1);
		self.free.push(id.index());
		released
	}

	fn len(&self) -> usize {
		self.slots.len() - self.free.len()
	}
}

/// Subscribers to notify in one propagation pass.
#[derive(Default)]
struct Batch {
	plain: SmallVec<[Rc<dyn Subscriber>; 4]>,
	memoized: SmallVec<[Rc<dyn Subscriber>; 4]>,
}

impl Batch {
	fn push(&mut self, subscriber: Rc<dyn Subscriber>) {
		if subscriber.is_computed() {
			self.memoized.push(subscriber);
		} else {
			self.plain.push(subscriber);
		}
	}

	fn run(self) {
		for subscriber in self.plain.iter().chain(self.memoized.iter()) {
			subscriber.notify();
		}
	}
}

impl Default for Runtime {
	fn default() -> Self {
		Self::new()
	}
}

impl PartialEq for Runtime {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}
}

impl std::fmt::Debug for Runtime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Runtime")
			.field("computations", &self.inner.arena.borrow().len())
			.field("depth", &self.inner.stack.borrow().len())
			.finish()
	}
}

impl Runtime {
	pub fn new() -> Self {
		Runtime {
			inner: Rc::new_cyclic(|this| RuntimeInner {
				stack: RefCell::new(SmallVec::new()),
				arena: RefCell::new(Arena::default()),
				store: RefCell::new(Store::default()),
				this: this.clone(),
			}),
		}
	}

	/// The default runtime of the current thread.
	pub fn current() -> Self {
		RUNTIME.with(Clone::clone)
	}

	/// Makes `target` reactive. The handle stops tracking once every
	/// `Runtime` handle of this engine is gone.
	pub fn observe(&self, target: Object) -> Observed {
		Observed::new(target, self.inner.this.clone())
	}

	/// Registers a computation and runs it once.
	pub fn effect<T, F>(&self, func: F) -> Computation<T>
	where
		T: 'static,
		F: Fn() -> T + 'static,
	{
		self.effect_with(func, EffectOptions::default())
	}

	/// Registers a computation scheduled by `options`.
	pub fn effect_with<T, F>(&self, func: F, options: EffectOptions) -> Computation<T>
	where
		T: 'static,
		F: Fn() -> T + 'static,
	{
		let id = self.inner.arena.borrow_mut().reserve();
		let body = Rc::new(ComputationBody::new(
			id,
			options,
			Box::new(func),
			self.inner.this.clone(),
		));
		self.inner.arena.borrow_mut().install(id, body.clone());

		debug!(
			id = %id,
			name = options.name,
			computed = options.computed,
			lazy = options.lazy,
			"computation registered"
		);

		let computation = Computation::from_body(body);
		if !options.lazy {
			let _ = computation.call();
		}
		computation
	}

	/// Creates a memoized value. `func` does not run until the first read.
	pub fn computed<T, F>(&self, func: F) -> Computed<T>
	where
		T: Clone + 'static,
		F: Fn() -> T + 'static,
	{
		self.computed_with(func, EffectOptions::default())
	}

	/// Like [`Runtime::computed`]; only the name of `options` is used,
	/// the computation is always memoized and deferred.
	pub fn computed_with<T, F>(&self, func: F, options: EffectOptions) -> Computed<T>
	where
		T: Clone + 'static,
		F: Fn() -> T + 'static,
	{
		let options = options.computed().lazy();
		let id = self.inner.arena.borrow_mut().reserve();
		let computation = Computation::from_body(Rc::new(ComputationBody::new(
			id,
			options,
			Box::new(func),
			self.inner.this.clone(),
		)));
		let body = Rc::new(ComputedBody::new(computation, self.inner.this.clone()));
		self.inner.arena.borrow_mut().install(id, body.clone());

		debug!(id = %id, name = options.name, "computed registered");

		Computed::from_body(body)
	}

	/// Runs `body` as computation `id`. Returns `None` without running
	/// anything when `id` is already executing.
	pub fn run<T>(&self, id: ComputationId, body: impl FnOnce() -> T) -> Option<T> {
		self.inner.run(id, body)
	}

	/// Runs `func` without attributing any reads to the active computation.
	pub fn untrack<T>(&self, func: impl FnOnce() -> T) -> T {
		let _frame = self.inner.enter(None);
		func()
	}

	/// The computation reads are currently attributed to.
	pub fn active(&self) -> Option<ComputationId> {
		self.inner.active()
	}

	pub fn is_running(&self, id: ComputationId) -> bool {
		self.inner.is_running(id)
	}

	/// Records that the active computation depends on `object[key]`.
	pub fn track(&self, object: &Object, key: &str) {
		self.inner.track(object, key)
	}

	/// Runs everything that depends on `object[key]`.
	pub fn trigger(&self, object: &Object, key: &str, info: ChangeInfo) {
		self.inner.trigger(object, key, &info)
	}

	pub fn subscriber_count(&self, object: &Object, key: &str) -> usize {
		self.inner.store.borrow().field(object.id(), key).len()
	}

	/// Number of live computations; stopped ones are not counted.
	pub fn computation_count(&self) -> usize {
		self.inner.arena.borrow().len()
	}

	pub fn ptr_eq(&self, other: &Runtime) -> bool {
		self == other
	}
}

/// Pops the tracking stack on drop, so a panicking body leaves it balanced.
struct FrameGuard<'a> {
	stack: &'a RefCell<SmallVec<[Frame; 8]>>,
}

impl Drop for FrameGuard<'_> {
	fn drop(&mut self) {
		self.stack.borrow_mut().pop();
	}
}

impl RuntimeInner {
	fn enter(&self, frame: Frame) -> FrameGuard<'_> {
		self.stack.borrow_mut().push(frame);
		FrameGuard { stack: &self.stack }
	}

	pub(crate) fn run<T>(&self, id: ComputationId, body: impl FnOnce() -> T) -> Option<T> {
		if self.is_running(id) {
			trace!(id = %id, "computation already running, skipped");
			return None;
		}

		let _frame = self.enter(Some(id));
		Some(body())
	}

	pub(crate) fn is_running(&self, id: ComputationId) -> bool {
		self.stack.borrow().contains(&Some(id))
	}

	pub(crate) fn active(&self) -> Option<ComputationId> {
		self.stack.borrow().last().copied().flatten()
	}

	fn subscriber(&self, id: ComputationId) -> Option<Rc<dyn Subscriber>> {
		self.arena.borrow().get(id)
	}

	/// Attributes `source` to the active computation. Returns `true` when a
	/// new edge was added.
	pub(crate) fn link(&self, source: Dependency) -> bool {
		let Some(id) = self.active() else {
			return false;
		};

		if source == Dependency::Computed(id) {
			return false;
		}

		if !self.store.borrow_mut().record(&source, id) {
			return false;
		}

		trace!(id = %id, source = %source, "dependency recorded");

		if let Some(subscriber) = self.subscriber(id) {
			subscriber.joined(source);
		}
		true
	}

	pub(crate) fn track(&self, object: &Object, key: &str) {
		if self.link(Dependency::field(object.id(), key)) {
			object.watched_by(&self.this);
		}
	}

	pub(crate) fn trigger(&self, object: &Object, key: &str, info: &ChangeInfo) {
		if key.is_empty() {
			return;
		}

		let subscribers = {
			let store = self.store.borrow();
			if !store.has_target(object.id()) {
				return;
			}
			store.field(object.id(), key)
		};

		trace!(
			object = %object.id(),
			key,
			old = ?info.old_value,
			new = ?info.new_value,
			subscribers = subscribers.len(),
			"field changed"
		);

		self.propagate(&subscribers);
	}

	/// Two phases. First every cached computed reachable from `roots` is
	/// marked stale, which runs no user code. Then the direct subscribers
	/// run, plain before memoized, followed by the readers of the stale
	/// computeds. Each subscriber is notified at most once per pass.
	fn propagate(&self, roots: &Subscribers) {
		if roots.is_empty() {
			return;
		}

		let mut seen = FxHashSet::default();
		let mut stale: SmallVec<[ComputationId; 4]> = SmallVec::new();
		let mut direct = Batch::default();
		let mut readers = Batch::default();

		for &id in roots {
			if !seen.insert(id) {
				continue;
			}
			let Some(subscriber) = self.subscriber(id) else {
				continue;
			};
			if subscriber.invalidate() {
				stale.push(id);
			} else {
				direct.push(subscriber);
			}
		}

		let mut next = 0;
		while let Some(&source) = stale.get(next) {
			next += 1;
			let subscribers = self
				.store
				.borrow()
				.subscribers(&Dependency::Computed(source));

			for id in subscribers {
				if !seen.insert(id) {
					continue;
				}
				let Some(subscriber) = self.subscriber(id) else {
					continue;
				};
				if subscriber.invalidate() {
					stale.push(id);
				} else {
					readers.push(subscriber);
				}
			}
		}

		direct.run();
		readers.run();
	}

	/// Removes `id` from every source in `dependencies` and frees its slot.
	pub(crate) fn detach(&self, id: ComputationId, dependencies: &[Dependency]) {
		{
			let mut store = self.store.borrow_mut();
			for source in dependencies {
				store.remove(source, id);
			}
			store.forget_computed(id);
		}

		let released = self.arena.borrow_mut().release(id);
		drop(released);
	}

	pub(crate) fn forget(&self, object: crate::ObjectId) {
		if let Ok(mut store) = self.store.try_borrow_mut() {
			store.forget(object);
		}
	}
}
