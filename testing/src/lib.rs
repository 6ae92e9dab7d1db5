//! Test support for the simulation kernel: deterministic distributions and a logger that
//! buffers records in memory.

#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::distributions::Distribution;

pub mod logger;

/// Distribution cycling through a fixed sequence of values, ignoring the random generator.
///
/// Useful for scripting exact inter-arrival or service times in tests.
///
/// # Examples
///
/// ```
/// # use rand::distributions::Distribution;
/// let cycle = testing::Cycle::new(vec![1.0, 2.5]);
/// let mut rng = rand::rngs::mock::StepRng::new(0, 1);
/// let values: Vec<f64> = (0..3).map(|_| cycle.sample(&mut rng)).collect();
/// assert_eq!(values, vec![1.0, 2.5, 1.0]);
/// ```
#[derive(Debug)]
pub struct Cycle<T> {
    values: Vec<T>,
    position: AtomicUsize,
}

impl<T> Cycle<T> {
    /// Constructs a distribution returning `values` in order, starting over after the last one.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty.
    #[must_use]
    pub fn new(values: Vec<T>) -> Self {
        assert!(!values.is_empty(), "cycle must have at least one value");
        Self {
            values,
            position: AtomicUsize::new(0),
        }
    }
}

impl<T: Copy> Distribution<T> for Cycle<T> {
    fn sample<R: rand::Rng + ?Sized>(&self, _: &mut R) -> T {
        let position = self.position.fetch_add(1, Ordering::Relaxed);
        self.values[position % self.values.len()]
    }
}
