use embassy_stm32::Peri;
use embassy_stm32::flash::{Blocking, Error, Flash};
use embassy_stm32::peripherals::FLASH;
use kwl_core::crash::{CRASH_LOG_OFFSET, CrashStorage};

/// Last 2 KiB page of the 512 KiB flash, reserved for configuration.
const CONFIG_PAGE: u32 = 0x0007_F800;
const PAGE_SIZE: u32 = 0x800;

#[allow(clippy::cast_possible_truncation)]
const CRASH_AREA: u32 = CONFIG_PAGE + CRASH_LOG_OFFSET as u32;

/// Crash ring in the configuration page.
///
/// Flash cannot be rewritten in place, so every store erases the page. The
/// page holds nothing but the crash area.
pub struct FlashStorage<'d> {
    flash: Flash<'d, Blocking>,
}

impl<'d> FlashStorage<'d> {
    pub fn new(flash: Peri<'d, FLASH>) -> Self {
        Self {
            flash: Flash::new_blocking(flash),
        }
    }
}

impl CrashStorage for FlashStorage<'_> {
    type Error = Error;

    fn load(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.flash.blocking_read(CRASH_AREA, buf)
    }

    fn store(&mut self, data: &[u8]) -> Result<(), Error> {
        let fits = u32::try_from(data.len()).is_ok_and(|len| CRASH_AREA + len <= CONFIG_PAGE + PAGE_SIZE);
        if !fits {
            return Err(Error::Size);
        }
        self.flash.blocking_erase(CONFIG_PAGE, CONFIG_PAGE + PAGE_SIZE)?;
        self.flash.blocking_write(CRASH_AREA, data)
    }
}
