pub mod controller;
pub mod dispatch;
pub mod handler;

use core::fmt;

/// Hardware interrupt number, as delivered by the trap vector glue and
/// arbitrated by the interrupt controller.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vector(u8);

impl Vector {
    /// First vector software may route through the dispatch tables.
    /// Everything below is CPU trap territory and never reaches this crate.
    pub const FIRST_CONFIGURABLE: Self = Self(0x10);

    /// Number of distinct vectors.
    pub const COUNT: usize = 256;

    /// Number of vectors the dispatch tables cover.
    #[allow(clippy::as_conversions)]
    pub const CONFIGURABLE_COUNT: usize = Self::COUNT - Self::FIRST_CONFIGURABLE.0 as usize;

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Whether this vector may carry a registered handler chain.
    pub const fn is_configurable(self) -> bool {
        self.0 >= Self::FIRST_CONFIGURABLE.0
    }

    /// Run level this vector dispatches at.
    pub fn run_level(self) -> crate::runlevel::RunLevel {
        crate::runlevel::run_level_for(self)
    }

    /// Index into the per-processor tables covering the configurable range.
    pub(crate) fn table_index(self) -> usize {
        debug_assert!(self.is_configurable());

        usize::from(self.0 - Self::FIRST_CONFIGURABLE.0)
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Enables interrupts for the current hardware thread.
pub fn enable() {
    #[cfg(test)]
    crate::arch::emulated::set_interrupt_flag(true);

    #[cfg(all(target_arch = "x86_64", not(test)))]
    crate::arch::x86_64::instructions::__sti();

    #[cfg(not(any(target_arch = "x86_64", test)))]
    unimplemented!();
}

/// Disables interrupts for the current hardware thread.
pub fn disable() {
    #[cfg(test)]
    crate::arch::emulated::set_interrupt_flag(false);

    #[cfg(all(target_arch = "x86_64", not(test)))]
    crate::arch::x86_64::instructions::__cli();

    #[cfg(not(any(target_arch = "x86_64", test)))]
    unimplemented!();
}

/// Whether or not interrupts are enabled for the current hardware thread.
pub fn is_enabled() -> bool {
    #[cfg(test)]
    {
        crate::arch::emulated::interrupt_flag()
    }

    #[cfg(all(target_arch = "x86_64", not(test)))]
    {
        crate::trap::RFlags::from_bits_truncate(
            crate::arch::x86_64::instructions::__read_rflags(),
        )
        .contains(crate::trap::RFlags::INTERRUPT_FLAG)
    }

    #[cfg(not(any(target_arch = "x86_64", test)))]
    {
        unimplemented!()
    }
}

/// Disables interrupts if they were enabled, executes `func`, then re-enables
/// interrupts if they were disabled.
#[inline]
pub fn uninterruptable<T>(func: impl FnOnce() -> T) -> T {
    let interrupts_enabled = is_enabled();

    if interrupts_enabled {
        disable();
    }

    let return_value = func();

    if interrupts_enabled {
        enable();
    }

    return_value
}
