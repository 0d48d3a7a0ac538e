pub mod address;
pub mod constants;
pub mod conversions;
pub mod logger;
pub mod memory;
pub mod profile_registry;
#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::address::Address;
pub use self::address::Value;
