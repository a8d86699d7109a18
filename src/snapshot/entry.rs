// Measured values carried by snapshots
//
// Three shapes: a single number, an opaque comparable payload, and an
// ordered list of entries. Each carries its own validity flag.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Common behaviour of every measured value
pub trait Entry: Clone {
    fn is_valid(&self) -> bool;

    fn set_valid(&mut self, valid: bool);

    /// Consume and return the entry flagged unusable
    fn invalidated(mut self) -> Self {
        self.set_valid(false);
        self
    }
}

/// Numeric types a [`DigitEntry`] can hold
///
/// Subtraction keeps the concrete type: `i32 - i32` stays `i32`, `f64 - f64`
/// stays `f64`. Integer subtraction wraps instead of panicking, so a counter
/// reset surfaces as a negative delta rather than an overflow abort.
pub trait Digit:
    Copy + PartialEq + PartialOrd + Default + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// `self - bgn` in the same numeric type
    fn minus(self, bgn: Self) -> Self;

    fn to_f64(self) -> f64;
}

macro_rules! impl_int_digit {
    ($($t:ty),*) => {
        $(
            impl Digit for $t {
                fn minus(self, bgn: Self) -> Self {
                    self.wrapping_sub(bgn)
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

macro_rules! impl_float_digit {
    ($($t:ty),*) => {
        $(
            impl Digit for $t {
                fn minus(self, bgn: Self) -> Self {
                    self - bgn
                }

                fn to_f64(self) -> f64 {
                    self as f64
                }
            }
        )*
    };
}

impl_int_digit!(i32, i64);
impl_float_digit!(f32, f64);

/// A single measured number
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DigitEntry<N> {
    value: N,
    valid: bool,
}

impl<N: Digit> DigitEntry<N> {
    /// Wrap a value; always valid
    pub fn of(value: N) -> Self {
        DigitEntry { value, valid: true }
    }

    pub fn get(&self) -> N {
        self.value
    }
}

impl<N: Digit> Default for DigitEntry<N> {
    fn default() -> Self {
        Self::of(N::default())
    }
}

impl<N: Digit> Entry for DigitEntry<N> {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

impl<N: Digit> fmt::Display for DigitEntry<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// An opaque payload compared by equality
///
/// The empty bean is the "nothing changed" sentinel produced by
/// [`BeanDiffer`](super::BeanDiffer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeanEntry<T> {
    value: Option<T>,
    valid: bool,
}

impl<T: Clone> BeanEntry<T> {
    pub fn of(value: T) -> Self {
        BeanEntry {
            value: Some(value),
            valid: true,
        }
    }

    pub fn empty() -> Self {
        BeanEntry {
            value: None,
            valid: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

// Validity is bookkeeping, not part of the payload
impl<T: PartialEq> PartialEq for BeanEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Clone> Entry for BeanEntry<T> {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}

/// Ordered sequence of entries, e.g. one bucket per CPU core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry<E> {
    items: Vec<E>,
    valid: bool,
}

impl<E: Entry> ListEntry<E> {
    pub fn of(items: Vec<E>) -> Self {
        ListEntry { items, valid: true }
    }

    pub fn empty() -> Self {
        Self::of(Vec::new())
    }

    pub fn items(&self) -> &[E] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: E) {
        self.items.push(item);
    }

    /// The list's own flag, ignoring its elements
    pub(crate) fn own_valid(&self) -> bool {
        self.valid
    }
}

impl<N: Digit> ListEntry<DigitEntry<N>> {
    pub fn of_digits<I: IntoIterator<Item = N>>(values: I) -> Self {
        Self::of(values.into_iter().map(DigitEntry::of).collect())
    }

    /// Raw values, valid or not
    pub fn values(&self) -> Vec<N> {
        self.items.iter().map(DigitEntry::get).collect()
    }
}

impl<T: Clone> ListEntry<BeanEntry<T>> {
    pub fn of_beans<I: IntoIterator<Item = T>>(values: I) -> Self {
        Self::of(values.into_iter().map(BeanEntry::of).collect())
    }
}

impl<E: Entry> Entry for ListEntry<E> {
    /// A list is usable only if it and every element are valid
    fn is_valid(&self) -> bool {
        self.valid && self.items.iter().all(Entry::is_valid)
    }

    fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }
}
