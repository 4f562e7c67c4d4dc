//! Domain layer: configuration rules, principals, host candidates and
//! directory query helpers.  Everything here is pure data and functions.

pub mod candidate;
pub mod directory;
pub mod principal;
pub mod rules;
