//! Redacting wrapper for credential material
//!
//! OAuth client secrets and service-account private keys live inside
//! `Credentials` for their whole lifetime and credentials get logged with
//! `{:?}` in tracing fields, so both are held as `Secret<String>`. The codec
//! calls [`Secret::expose`] only when it writes the record to storage.

use std::fmt;
use zeroize::Zeroize;

/// Prints as `[REDACTED]` and is zeroed when dropped.
///
/// Equality compares the inner value, so two credentials holding the same
/// client secret still compare equal after a storage round trip.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Take ownership of the value.
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrow the value, e.g. to put a client secret into a token request form.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Zeroize + Eq> Eq for Secret<T> {}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
