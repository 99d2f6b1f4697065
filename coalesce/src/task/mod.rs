//! Background tasks owned by a coalescer. Currently only the debounce timer.

pub(crate) mod debounce;
