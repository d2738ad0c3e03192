use std::{fmt, ops::Deref};

/// One stored element: either a value the ring owns, or a reference to a
/// value the caller keeps ownership of.
///
/// Every variant of the ring buffer stores `Option<Cell<'a, T>>` per slot. An
/// enqueue fills the slot, a dequeue takes the whole cell out again, so a slot
/// never keeps a reference after it has been consumed.
///
/// # Examples
///
/// ```
/// use carousel::Cell;
///
/// let shared = String::from("borrowed");
/// let owned: Cell<'_, String> = Cell::from(String::from("owned"));
/// let borrowed: Cell<'_, String> = Cell::from(&shared);
///
/// assert!(owned.is_owned());
/// assert!(borrowed.is_borrowed());
/// assert_eq!(borrowed.len(), 8); // derefs to the referent
/// assert_eq!(borrowed.into_owned(), "borrowed");
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Cell<'a, T> {
    /// A value moved or copied into the ring.
    Owned(T),
    /// A non-owning reference to caller storage, stored without a copy.
    Borrowed(&'a T),
}

impl<'a, T> Cell<'a, T> {
    /// `true` if the ring owns the value.
    pub const fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// `true` if the cell refers to caller-owned storage.
    pub const fn is_borrowed(&self) -> bool {
        matches!(self, Self::Borrowed(_))
    }

    /// Returns the owned value, or `None` for a borrowed cell.
    pub fn into_inner(self) -> Option<T> {
        match self {
            Self::Owned(value) => Some(value),
            Self::Borrowed(_) => None,
        }
    }

    /// Extracts an owned value, cloning the referent of a borrowed cell.
    pub fn into_owned(self) -> T
    where
        T: Clone,
    {
        match self {
            Self::Owned(value) => value,
            Self::Borrowed(value) => value.clone(),
        }
    }
}

impl<T> Deref for Cell<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Self::Owned(value) => value,
            Self::Borrowed(value) => value,
        }
    }
}

impl<T> AsRef<T> for Cell<'_, T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T> From<T> for Cell<'_, T> {
    fn from(value: T) -> Self {
        Self::Owned(value)
    }
}

impl<'a, T> From<&'a T> for Cell<'a, T> {
    fn from(value: &'a T) -> Self {
        Self::Borrowed(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Cell<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(value) => f.debug_tuple("Owned").field(value).finish(),
            Self::Borrowed(value) => f.debug_tuple("Borrowed").field(value).finish(),
        }
    }
}
