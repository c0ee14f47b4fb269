//! Counting and sampling of hardware events on top of the `perf_event_open`
//! system call.
//!
//! Events are looked up by name in a [`CounterDefinition`][registry::CounterDefinition],
//! which also knows derived metrics such as `instructions-per-cycle` and wall
//! time events such as `seconds`.
//!
//! ## Counting
//!
//! An [`EventCounter`][count::EventCounter] packs the requested events into
//! groups that fit the hardware counters and corrects the values for
//! multiplexing.
//!
//! ```rust,no_run
//! use perf_monitor::count::EventCounter;
//! use perf_monitor::registry::CounterDefinition;
//!
//! let registry = CounterDefinition::new();
//! let mut counter = EventCounter::new(&registry);
//! counter
//!     .add_with(["instructions", "cycles", "instructions-per-cycle", "seconds"], Default::default())
//!     .unwrap();
//!
//! counter.start().unwrap();
//! fn fib(n: usize) -> usize {
//!     match n {
//!         0 => 0,
//!         1 => 1,
//!         n => fib(n - 1) + fib(n - 2),
//!     }
//! }
//! std::hint::black_box(fib(30));
//! counter.stop().unwrap();
//!
//! println!("{}", counter.result(1).unwrap());
//! ```
//!
//! ## Sampling
//!
//! A [`Sampler`][sample::Sampler] records the context of every `n`-th
//! occurrence of its trigger events, see the [`sample`] module.

pub mod config;
pub mod count;
mod cursor;
mod error;
pub mod event;
mod ffi;
pub mod hw;
pub mod registry;
pub mod sample;

pub use error::{Error, Result};
