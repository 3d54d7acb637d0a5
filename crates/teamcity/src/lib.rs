//! Group Sync TeamCity -- target client for the TeamCity REST API.
//!
//! Groups are addressed by a key derived from their name; memberships are
//! changed by replacing a user's whole group list under a per-user lock.

pub mod client;
pub mod models;

pub use client::{group_key, TeamCityClient};
