//! Data models for mailsort
//!
//! Emails as fetched from the mailbox, and the categories they are sorted into.

mod category;
mod email;

pub use category::*;
pub use email::*;
