/// Paging trace output, compiled in only with the `trace_paging` feature.
macro_rules! trace {
    ($($arg:tt)*) => {
        if cfg!(feature = "trace_paging") {
            swapvm_shared::println!($($arg)*);
        }
    };
}
