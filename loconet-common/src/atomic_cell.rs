//! Implements an AtomicCell type which uses critical_section Mutex to enforce atomic store/load
//!
//! Shared state on a bus node is touched from two places: the interrupt handlers (byte received,
//! bus edge, timer expired) and the polling loop. All of it is small and `Copy`, so a cell that
//! copies values in and out inside a critical section is sufficient, and works on cores without
//! compare-and-swap support.

use core::cell::Cell;
use critical_section::Mutex;

/// A `Copy` value which can be shared between interrupt and thread context
#[derive(Debug)]
pub struct AtomicCell<T: Copy> {
    inner: Mutex<Cell<T>>,
}

impl<T: Send + Copy> AtomicCell<T> {
    /// Create a new cell holding `value`
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(Cell::new(value)),
        }
    }

    /// Read the current value
    pub fn load(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).get())
    }

    /// Overwrite the current value
    pub fn store(&self, value: T) {
        critical_section::with(|cs| self.inner.borrow(cs).set(value));
    }

    /// Apply `f` to the current value and store the result, all inside one critical section
    ///
    /// Returns the newly stored value.
    pub fn update(&self, f: impl FnOnce(T) -> T) -> T {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let new_value = f(cell.get());
            cell.set(new_value);
            new_value
        })
    }

    /// Conditionally update the value
    ///
    /// If `f` returns `Some`, the new value is stored and the old value is returned in `Ok`.
    /// Otherwise the cell is left untouched and the current value is returned in `Err`.
    pub fn fetch_update(&self, f: impl FnOnce(T) -> Option<T>) -> Result<T, T> {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let old_value = cell.get();
            match f(old_value) {
                Some(new_value) => {
                    cell.set(new_value);
                    Ok(old_value)
                }
                None => Err(old_value),
            }
        })
    }
}

impl<T: Send + Copy + Default> AtomicCell<T> {
    /// Read the value, leaving `T::default()` in its place
    pub fn take(&self) -> T {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }
}

impl<T: Default + Copy + Send> Default for AtomicCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
