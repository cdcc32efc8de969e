//! STM32G0 implementations of the platform traits in `kwl-core`.

pub mod clock;
pub mod fault;
pub mod storage;
pub mod watchdog;

pub use clock::EmbassyClock;
pub use fault::{PreservedRam, Spin, SystemReset};
pub use storage::FlashStorage;
pub use watchdog::HardwareWatchdog;
