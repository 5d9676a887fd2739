//! A disposable table password.

use serde::{Deserialize, Serialize};

/// A secret that is zeroed when disposed or dropped.
///
/// Copies are fully independent buffers: disposing one copy never affects
/// another. Nodes hand out copies and keep their canonical value private.
#[derive(Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurePassword {
    chars: Vec<char>,
}

impl SecurePassword {
    /// Creates a password holding `secret`.
    pub fn new(secret: &str) -> Self {
        Self {
            chars: secret.chars().collect(),
        }
    }

    /// An empty password, which tables without a password use.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns an independent copy.
    pub fn copy(&self) -> Self {
        Self {
            chars: self.chars.clone(),
        }
    }

    /// Number of characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Whether the password is empty (or has been disposed).
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// The characters of the secret.
    pub fn expose(&self) -> &[char] {
        &self.chars
    }

    /// Zeroes the buffer and leaves the password empty.
    pub fn dispose(&mut self) {
        for c in self.chars.iter_mut() {
            // SAFETY: `c` is a valid, aligned, exclusive reference into the
            // buffer.
            unsafe { std::ptr::write_volatile(c, '\0') };
        }
        std::sync::atomic::compiler_fence(std::sync::atomic::Ordering::SeqCst);
        self.chars.clear();
    }
}

impl Clone for SecurePassword {
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl PartialEq for SecurePassword {
    /// Compares in time that depends only on the length.
    fn eq(&self, other: &Self) -> bool {
        if self.chars.len() != other.chars.len() {
            return false;
        }
        let difference = self
            .chars
            .iter()
            .zip(&other.chars)
            .fold(0u32, |acc, (a, b)| acc | (u32::from(*a) ^ u32::from(*b)));
        difference == 0
    }
}

impl Eq for SecurePassword {}

impl Drop for SecurePassword {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SecurePassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecurePassword(<redacted>)")
    }
}

impl From<&str> for SecurePassword {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}
