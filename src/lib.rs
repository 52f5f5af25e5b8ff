//! Fine-grained reactive state.
//!
//! Wrap plain [`Object`]s with [`observe`], register computations with
//! [`effect`] and derive memoized values with [`computed`]. Every tracked
//! read made while a computation runs is recorded; writing the field later
//! re-runs the plain computations that read it, then invalidates the
//! memoized ones.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use observe_reactive::{effect, observe, Object};
//!
//! let state = observe(Object::new().with("a", 1));
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! effect({
//!     let state = state.clone();
//!     let log = log.clone();
//!     move || log.borrow_mut().push(state.get("a").and_then(|a| a.as_int()))
//! });
//!
//! state.set("a", 2);
//! assert_eq!(*log.borrow(), vec![Some(1), Some(2)]);
//! ```
//!
//! The free functions use a thread-local [`Runtime`]; create your own with
//! [`Runtime::new`] to keep independent graphs apart.

pub mod macros;

mod computation;
mod computed;
mod dependencies;
mod error;
mod object;
mod observed;
mod runtime;

pub use computation::{Computation, ComputationId, EffectOptions};
pub use computed::Computed;
pub use dependencies::Dependency;
pub use error::Error;
pub use object::{FromValue, Key, Object, ObjectId, Value};
pub use observed::{Field, Observed};
pub use runtime::{ChangeInfo, Runtime};

/// Makes `target` reactive on the current thread's runtime.
pub fn observe(target: Object) -> Observed {
	Runtime::current().observe(target)
}

/// Registers a computation on the current thread's runtime and runs it once.
pub fn effect<T, F>(func: F) -> Computation<T>
where
	T: 'static,
	F: Fn() -> T + 'static,
{
	Runtime::current().effect(func)
}

/// Registers a computation on the current thread's runtime, scheduled by
/// `options`. A lazy computation waits for its first [`Computation::call`].
pub fn effect_with<T, F>(func: F, options: EffectOptions) -> Computation<T>
where
	T: 'static,
	F: Fn() -> T + 'static,
{
	Runtime::current().effect_with(func, options)
}

/// Creates a memoized value on the current thread's runtime.
pub fn computed<T, F>(func: F) -> Computed<T>
where
	T: Clone + 'static,
	F: Fn() -> T + 'static,
{
	Runtime::current().computed(func)
}

/// Runs `func` without recording dependencies.
pub fn untrack<T>(func: impl FnOnce() -> T) -> T {
	Runtime::current().untrack(func)
}
