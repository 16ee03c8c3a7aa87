pub mod mac_test;
pub mod mocks;

pub use mac_test::{MacTest, default_test_config};
pub use mocks::{MockPhy, MockRlc, MockRrc};
