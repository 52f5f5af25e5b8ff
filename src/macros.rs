pub use enclose::*;

/// Registers an effect on the thread's default runtime, cloning the listed
/// handles into the closure.
///
/// ```ignore
/// let state = observe(Object::new().with("a", 1));
/// effect!((state) {
///     println!("{:?}", state.get("a"));
/// });
/// ```
#[macro_export]
macro_rules! effect {
    (( $($d_tt:tt)* ) $($b:tt)+) => {
        $crate::effect($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($($b:tt)*) => {
        $crate::effect(move || { $($b)* })
    };
}

#[macro_export]
macro_rules! computed {
    (( $($d_tt:tt)* ) $($b:tt)+) => {
        $crate::computed($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    ($($b:tt)*) => {
        $crate::computed(move || { $($b)* })
    };
}
