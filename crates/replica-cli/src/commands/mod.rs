//! Command handlers grouped by concern.

pub(crate) mod copy;
pub(crate) mod inspect;
