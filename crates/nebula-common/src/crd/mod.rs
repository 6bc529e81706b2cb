//! Custom Resource Definitions for Nebula

mod team;

pub use team::{Team, TeamSpec};
