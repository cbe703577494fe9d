//! Test helper modules for dsync integration tests
//!
//! - FakeArchive: in-memory inventories for any number of nodes
//! - FakeTransfer: C-MOVE stand-in that copies images between FakeArchive nodes
//! - fixtures: nodes, clock and candidate builders

#![allow(dead_code)]

pub mod fake_archive;
pub mod fake_transfer;
pub mod fixtures;

pub use fake_archive::FakeArchive;
pub use fake_transfer::FakeTransfer;
pub use fixtures::*;
