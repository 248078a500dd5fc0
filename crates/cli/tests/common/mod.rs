//! Common utilities for integration tests

pub mod fixtures;
pub mod provider;

pub use fixtures::StagingFixture;
pub use provider::FakeProvider;
