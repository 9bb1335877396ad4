//! Three-way merge classifier and conflict-resolution policy (spec §4.3,
//! §4.4). [`classify`] takes the base/ours/theirs state of a single path and
//! produces a [`crate::model::MergeCase`]; [`resolve`] maps that case plus a
//! configured [`crate::config::Strategy`] to a concrete resolved value.

pub mod classify;
pub mod resolve;
