//! Helper macros for ABI function generation.

/// Generate an exported `extern "C"` entry point.
///
/// ```ignore
/// abi_fn! {
///     /// Doc comment for the function.
///     fn udsmux_thing(handle: c_int) -> c_int {
///         // body
///     }
/// }
/// ```
///
/// Expands to `#[unsafe(no_mangle)] pub unsafe extern "C" fn` and emits a
/// trace-level `abi_call` record naming the symbol before the body runs.
macro_rules! abi_fn {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        #[allow(unused_unsafe)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret {
            udsmux_membrane::structured_log::log_event(
                udsmux_membrane::structured_log::LogLevel::Trace,
                "abi_call",
                |e| e.with_op(stringify!($name)),
            );
            unsafe { $body }
        }
    };
}

#[allow(unused_imports)]
pub(crate) use abi_fn;
