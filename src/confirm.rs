//! Asking before destroying data.
//!
//! Destructive steps take a `force` flag plus a [`Confirm`] implementation,
//! so the engine never talks to a terminal itself.

/// Decides whether a destructive step may proceed.
pub trait Confirm {
    fn confirm(&self, message: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

/// Declines every request; existing data is always kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decline;

impl Confirm for Decline {
    fn confirm(&self, _message: &str) -> bool {
        false
    }
}
