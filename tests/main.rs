use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mockall::predicate::eq;
use mockall::Sequence;
use observe_reactive::{
	computed, effect, observe, ChangeInfo, Computed, Dependency, EffectOptions, Error, Field,
	Object, Runtime, Value,
};
use tracing_subscriber::EnvFilter;


use mock::Spy;

fn init() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_test_writer()
		.try_init();
}

fn int(field: Option<Field>) -> i64 {
	field.and_then(|f| f.as_int()).unwrap_or_default()
}

#[test]
fn dependency_is_recorded_once() {
	init();
	let runtime = Runtime::new();
	let object = Object::new().with("a", 1);
	let state = runtime.observe(object.clone());

	let reader = runtime.effect({
		let state = state.clone();
		move || int(state.get("a"))
	});

	assert_eq!(runtime.subscriber_count(&object, "a"), 1);
	assert_eq!(reader.dependency_count(), 1);
	assert_eq!(
		reader.dependencies(),
		vec![Dependency::field(object.id(), "a")]
	);

	assert_eq!(reader.call(), Some(1));
	assert_eq!(runtime.subscriber_count(&object, "a"), 1);
	assert_eq!(reader.dependency_count(), 1);
}

#[test]
fn write_reruns_effect() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));
	let log = Rc::new(RefCell::new(Vec::new()));

	runtime.effect({
		let state = state.clone();
		let log = log.clone();
		move || log.borrow_mut().push(int(state.get("a")))
	});

	state.set("a", 2);

	assert_eq!(*log.borrow(), vec![1, 2]);
}

#[test]
fn every_write_propagates() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));
	let mock = mock::SharedMock::new();

	mock.get().expect_trigger().with(eq(1)).times(3).return_const(());

	runtime.effect({
		let state = state.clone();
		let mock = mock.clone();
		move || {
			let a = int(state.get("a"));
			mock.get().trigger(a);
		}
	});

	state.set("a", 1);
	state.set("a", 1);

	mock.get().checkpoint();
}

#[test]
fn plain_subscribers_run_before_memoized() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));
	let mock = mock::SharedMock::new();

	mock.get().expect_compute().with(eq(1)).times(1).return_const(());
	mock.get().expect_trigger().with(eq(1)).times(1).return_const(());

	// registered first, still runs last
	let memoized = runtime.effect_with(
		{
			let state = state.clone();
			let mock = mock.clone();
			move || {
				let a = int(state.get("a"));
				mock.get().compute(a);
			}
		},
		EffectOptions::new().computed().named("memoized"),
	);

	runtime.effect({
		let state = state.clone();
		let mock = mock.clone();
		move || {
			let a = int(state.get("a"));
			mock.get().trigger(a);
		}
	});

	assert!(memoized.is_computed());
	assert!(!memoized.is_lazy());
	mock.get().checkpoint();

	let mut seq = Sequence::new();
	mock.get()
		.expect_trigger()
		.with(eq(2))
		.times(1)
		.in_sequence(&mut seq)
		.return_const(());
	mock.get()
		.expect_compute()
		.with(eq(2))
		.times(1)
		.in_sequence(&mut seq)
		.return_const(());

	state.set("a", 2);

	mock.get().checkpoint();
}

#[test]
fn computed_is_observed_after_plain_effects() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));
	let log = Rc::new(RefCell::new(Vec::<String>::new()));

	let tenfold = runtime.computed({
		let state = state.clone();
		let log = log.clone();
		move || {
			log.borrow_mut().push("computed".into());
			int(state.get("a")) * 10
		}
	});

	runtime.effect({
		let tenfold = tenfold.clone();
		let log = log.clone();
		move || {
			let value = tenfold.get();
			log.borrow_mut().push(format!("reader:{:?}", value));
		}
	});

	runtime.effect({
		let state = state.clone();
		let log = log.clone();
		move || {
			let a = int(state.get("a"));
			log.borrow_mut().push(format!("plain:{}", a));
		}
	});

	assert_eq!(*log.borrow(), vec!["computed", "reader:Ok(10)", "plain:1"]);
	log.borrow_mut().clear();

	state.set("a", 2);

	assert_eq!(*log.borrow(), vec!["plain:2", "computed", "reader:Ok(20)"]);
}

#[test]
fn self_write_does_not_recurse() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("n", 0));
	let runs = Rc::new(Cell::new(0));

	runtime.effect({
		let state = state.clone();
		let runs = runs.clone();
		move || {
			runs.set(runs.get() + 1);
			let n = int(state.get("n"));
			state.set("n", n + 1);
		}
	});

	assert_eq!(runs.get(), 1);
	assert_eq!(state.target().get_raw("n"), Some(Value::Int(1)));

	state.set("n", 10);

	assert_eq!(runs.get(), 2);
	assert_eq!(state.target().get_raw("n"), Some(Value::Int(11)));
}

#[test]
fn nested_objects_are_observed_lazily() {
	init();
	let runtime = Runtime::new();
	let inner = Object::new().with("y", 1);
	let state = runtime.observe(Object::new().with("x", inner.clone()).with("z", 0));
	let runs = Rc::new(Cell::new(0));

	assert!(matches!(state.target().get_raw("x"), Some(Value::Object(_))));

	runtime.effect({
		let state = state.clone();
		let runs = runs.clone();
		move || {
			runs.set(runs.get() + 1);
			int(state.get("z"));
		}
	});
	assert_eq!(runtime.subscriber_count(&inner, "y"), 0);

	let x = match state.get("x") {
		Some(Field::Object(x)) => x,
		other => panic!("expected an observed object, got {:?}", other),
	};
	assert_eq!(x.target(), &inner);

	runtime.effect({
		let x = x.clone();
		let runs = runs.clone();
		move || {
			runs.set(runs.get() + 1);
			int(x.get("y"));
		}
	});
	assert_eq!(runtime.subscriber_count(&inner, "y"), 1);
	assert_eq!(runs.get(), 2);

	if let Some(x) = state.object("x") {
		x.set("y", 2);
	}
	assert_eq!(runs.get(), 3);
}

#[test]
fn untracked_write_is_a_noop() {
	init();
	let runtime = Runtime::new();
	let object = Object::new().with("a", 1);
	let state = runtime.observe(object.clone());
	let runs = Rc::new(Cell::new(0));

	state.set("never-read", 1);
	runtime.trigger(
		&Object::new(),
		"a",
		ChangeInfo {
			old_value: None,
			new_value: Value::Null,
		},
	);

	runtime.effect({
		let state = state.clone();
		let runs = runs.clone();
		move || {
			runs.set(runs.get() + 1);
			int(state.get("a"));
			int(state.get(""));
		}
	});

	state.set("b", 2);
	// empty keys are never propagated
	state.set("", 3);

	assert_eq!(runs.get(), 1);
	assert_eq!(runtime.subscriber_count(&object, "b"), 0);
}

#[test]
fn computed_is_deferred_and_cached() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 2));
	let mock = mock::SharedMock::new();

	mock.get().expect_compute().times(0).return_const(());

	let double = runtime.computed({
		let state = state.clone();
		let mock = mock.clone();
		move || {
			let a = int(state.get("a"));
			mock.get().compute(a);
			a * 2
		}
	});

	assert!(double.is_dirty());
	assert_eq!(double.peek(), None);
	assert!(double.computation().is_lazy());
	assert!(double.computation().is_computed());
	mock.get().checkpoint();

	mock.get().expect_compute().with(eq(2)).times(1).return_const(());
	assert_eq!(double.get(), Ok(4));
	assert_eq!(double.get(), Ok(4));
	mock.get().checkpoint();

	mock.get().expect_compute().times(0).return_const(());
	state.set("a", 5);
	assert!(double.is_dirty());
	mock.get().checkpoint();

	mock.get().expect_compute().with(eq(5)).times(1).return_const(());
	assert_eq!(double.get(), Ok(10));
	mock.get().checkpoint();
}

#[test]
fn computed_chain_propagates() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));

	let double = runtime.computed({
		let state = state.clone();
		move || int(state.get("a")) * 2
	});
	let quadruple = runtime.computed({
		let double = double.clone();
		move || double.get().unwrap_or_default() * 2
	});

	let seen = Rc::new(RefCell::new(Vec::new()));
	runtime.effect({
		let quadruple = quadruple.clone();
		let seen = seen.clone();
		move || seen.borrow_mut().push(quadruple.get())
	});

	state.set("a", 3);

	assert_eq!(*seen.borrow(), vec![Ok(4), Ok(12)]);
}

#[test]
fn effect_reading_source_and_computed_sees_fresh_value() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));
	let seen = Rc::new(RefCell::new(Vec::new()));

	let double = runtime.computed({
		let state = state.clone();
		move || int(state.get("a")) * 2
	});

	runtime.effect({
		let state = state.clone();
		let double = double.clone();
		let seen = seen.clone();
		move || {
			let a = int(state.get("a"));
			let doubled = double.get().unwrap_or_default();
			seen.borrow_mut().push((a, doubled));
		}
	});

	state.set("a", 2);

	assert_eq!(*seen.borrow(), vec![(1, 2), (2, 4)]);
}

#[test]
fn dirty_computed_still_reaches_readers() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 0));
	let seen = Rc::new(RefCell::new(Vec::new()));

	let double = runtime.computed({
		let state = state.clone();
		move || int(state.get("a")) * 2
	});

	// the first run writes the source, leaving the computed dirty with no
	// reader re-run
	runtime.effect({
		let state = state.clone();
		let double = double.clone();
		let seen = seen.clone();
		move || {
			let value = double.get().unwrap_or_default();
			seen.borrow_mut().push(value);
			if seen.borrow().len() == 1 {
				state.set("a", 5);
			}
		}
	});
	assert!(double.is_dirty());

	state.set("a", 10);

	assert_eq!(*seen.borrow(), vec![0, 20]);
}

#[test]
fn computeds_sharing_a_source_rerun_reader_once() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));
	let pairs = Rc::new(RefCell::new(Vec::new()));

	let double = runtime.computed({
		let state = state.clone();
		move || int(state.get("a")) * 2
	});
	let triple = runtime.computed({
		let state = state.clone();
		move || int(state.get("a")) * 3
	});

	runtime.effect({
		let double = double.clone();
		let triple = triple.clone();
		let pairs = pairs.clone();
		move || {
			let pair = (double.get(), triple.get());
			pairs.borrow_mut().push(pair);
		}
	});

	state.set("a", 2);
	state.set("a", 3);

	assert_eq!(
		*pairs.borrow(),
		vec![(Ok(2), Ok(3)), (Ok(4), Ok(6)), (Ok(6), Ok(9))]
	);
}

#[test]
fn stopped_computed_keeps_last_value() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1));

	let unread = runtime.computed({
		let state = state.clone();
		move || int(state.get("a"))
	});
	unread.computation().stop();
	assert_eq!(unread.get(), Err(Error::Stopped { name: "<unnamed>" }));

	let total = runtime.computed_with(
		{
			let state = state.clone();
			move || int(state.get("a"))
		},
		EffectOptions::new().named("total"),
	);
	assert_eq!(total.get(), Ok(1));

	total.computation().stop();
	state.set("a", 2);

	assert_eq!(total.get(), Ok(1));
	assert_eq!(runtime.subscriber_count(state.target(), "a"), 0);
	assert_eq!(
		Error::Stopped { name: "total" }.to_string(),
		"computed `total` is stopped"
	);
}

#[test]
fn computed_reading_itself_reports_cycle() {
	init();
	let runtime = Runtime::new();
	let slot: Rc<RefCell<Option<Computed<i64>>>> = Rc::new(RefCell::new(None));

	let looping = runtime.computed({
		let slot = slot.clone();
		move || match slot.borrow().as_ref().map(Computed::get) {
			Some(Err(Error::Cycle { .. })) => -1,
			Some(Ok(value)) => value,
			_ => 0,
		}
	});
	*slot.borrow_mut() = Some(looping.clone());

	assert_eq!(looping.get(), Ok(-1));

	slot.borrow_mut().take();
}

#[test]
fn panicking_effect_keeps_tracking_intact() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 1).with("b", 1));

	runtime.effect({
		let state = state.clone();
		move || {
			if int(state.get("a")) == 2 {
				panic!("a must not be 2");
			}
		}
	});

	let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| state.set("a", 2)));
	assert!(result.is_err());
	assert_eq!(runtime.active(), None);

	let runs = Rc::new(Cell::new(0));
	let reader = runtime.effect({
		let state = state.clone();
		let runs = runs.clone();
		move || {
			runs.set(runs.get() + 1);
			int(state.get("b"));
		}
	});
	assert_eq!(reader.dependency_count(), 1);

	state.set("b", 2);
	assert_eq!(runs.get(), 2);
}

#[test]
fn stopped_effect_never_runs() {
	init();
	let runtime = Runtime::new();
	let object = Object::new().with("a", 1);
	let state = runtime.observe(object.clone());
	let runs = Rc::new(Cell::new(0));

	let watcher = runtime.effect({
		let state = state.clone();
		let runs = runs.clone();
		move || {
			runs.set(runs.get() + 1);
			int(state.get("a"));
		}
	});

	watcher.stop();
	assert!(watcher.is_stopped());
	assert_eq!(watcher.dependency_count(), 0);
	assert_eq!(runtime.subscriber_count(&object, "a"), 0);

	state.set("a", 2);
	assert_eq!(watcher.call(), None);
	assert_eq!(runs.get(), 1);
}

#[test]
fn lazy_effect_waits_for_call() {
	init();
	let runtime = Runtime::new();
	let state = runtime.observe(Object::new().with("a", 4));

	let lazy = runtime.effect_with(
		{
			let state = state.clone();
			move || int(state.get("a")) + 1
		},
		EffectOptions::new().lazy(),
	);

	assert_eq!(lazy.dependency_count(), 0);
	assert_eq!(lazy.call(), Some(5));
	assert_eq!(lazy.dependency_count(), 1);
}

#[test]
fn untrack_skips_recording() {
	init();
	let runtime = Runtime::new();
	let object = Object::new().with("a", 1).with("b", 1);
	let state = runtime.observe(object.clone());

	runtime.effect({
		let state = state.clone();
		let runtime = runtime.clone();
		move || {
			int(state.get("a"));
			runtime.untrack(|| int(state.get("b")));
		}
	});

	assert_eq!(runtime.subscriber_count(&object, "a"), 1);
	assert_eq!(runtime.subscriber_count(&object, "b"), 0);
}

#[test]
fn runtimes_are_independent() {
	init();
	let first = Runtime::new();
	let second = Runtime::new();
	let object = Object::new().with("a", 1);
	let state = first.observe(object.clone());
	let runs = Rc::new(Cell::new(0));

	second.effect({
		let state = state.clone();
		let runs = runs.clone();
		move || {
			runs.set(runs.get() + 1);
			int(state.get("a"));
		}
	});

	state.set("a", 2);

	assert_eq!(runs.get(), 1);
	assert_eq!(first.subscriber_count(&object, "a"), 0);
	assert_eq!(second.subscriber_count(&object, "a"), 0);
}

#[test]
fn macros_capture_clones() {
	init();
	let state = observe(Object::new().with("a", 1));
	let log = Rc::new(RefCell::new(Vec::new()));

	let total = observe_reactive::computed!((state) {
		int(state.get("a")) + 100
	});

	observe_reactive::effect!((total, log) {
		log.borrow_mut().push(total.get());
	});

	state.set("a", 2);

	assert_eq!(*log.borrow(), vec![Ok(101), Ok(102)]);
}

#[test]
fn free_functions_share_default_runtime() {
	init();
	let state = observe(Object::new().with("a", 1));
	assert_eq!(state.runtime(), Some(Runtime::current()));

	let doubled = computed({
		let state = state.clone();
		move || int(state.get("a")) * 2
	});

	let seen = Rc::new(RefCell::new(Vec::new()));
	effect({
		let doubled = doubled.clone();
		let seen = seen.clone();
		move || seen.borrow_mut().push(doubled.get())
	});

	state.update("a", |a| Value::Int(a.and_then(|a| a.as_int()).unwrap_or_default() + 1));

	assert_eq!(*seen.borrow(), vec![Ok(2), Ok(4)]);
}
