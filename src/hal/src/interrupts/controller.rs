use crate::interrupts::Vector;
use core::fmt;

/// Outcome of asking a controller to acknowledge its highest asserted line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCause {
    /// A line fired and is now in service; dispatch it.
    LineFired,

    /// The controller reported a spurious assertion; nothing entered service
    /// and nothing may be completed.
    SpuriousInterrupt,

    /// No line of this controller was asserted.
    NoInterrupt,
}

/// Opaque completion cookie a controller returns from
/// [`ControllerDriver::acknowledge`].
///
/// The dispatch core carries the value bit-exact from acknowledge through the
/// pending queue to the matching end-of-interrupt; only the driver that
/// minted it assigns it meaning.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicCandy(u32);

impl MagicCandy {
    /// Placeholder handed to `acknowledge` for the driver to overwrite.
    pub const NONE: Self = Self(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn into_raw(self) -> u32 {
        self.0
    }
}

/// Interrupt controller plugin surface.
///
/// One implementation exists per controller kind; the dispatch core reaches
/// the hardware exclusively through this trait and never interprets what a
/// driver stores behind it.
pub trait ControllerDriver: Sync {
    /// Identifies the interrupting line. The driver may rewrite `vector` when
    /// the hardware reports a different line than the trap glue assumed, and
    /// must fill `magic` with the completion cookie when it returns
    /// [`InterruptCause::LineFired`].
    fn acknowledge(&self, vector: &mut Vector, magic: &mut MagicCandy) -> InterruptCause;

    /// Retires the in-service interrupt identified by `magic`.
    fn end_of_interrupt(&self, magic: MagicCandy);

    /// Whether [`ControllerDriver::fast_end_of_interrupt`] is implemented.
    fn supports_fast_eoi(&self) -> bool {
        false
    }

    /// Completion path that needs no cookie, for hardware whose
    /// end-of-interrupt is a single register write.
    fn fast_end_of_interrupt(&self) {}

    /// Number of priority classes the hardware masks while a line is in
    /// service. Zero means the hardware cannot mask equal-or-lower priority
    /// lines, and the dispatcher keeps processor interrupts disabled around
    /// handler execution.
    fn priority_count(&self) -> u32;
}

/// Per-processor view of the interrupt controller currently serving it.
///
/// A cheap copyable capability handle; pending-queue entries hold one so a
/// deferred interrupt is always completed through the controller that
/// acknowledged it.
#[derive(Clone, Copy)]
pub struct Controller {
    driver: &'static dyn ControllerDriver,
}

impl Controller {
    pub const fn new(driver: &'static dyn ControllerDriver) -> Self {
        Self { driver }
    }

    pub fn acknowledge(&self, vector: &mut Vector, magic: &mut MagicCandy) -> InterruptCause {
        self.driver.acknowledge(vector, magic)
    }

    /// Retires the in-service interrupt, preferring the contextless fast path
    /// when the driver provides one.
    pub fn complete(&self, magic: MagicCandy) {
        if self.driver.supports_fast_eoi() {
            self.driver.fast_end_of_interrupt();
        } else {
            self.driver.end_of_interrupt(magic);
        }
    }

    /// Whether the hardware masks equal-and-lower priorities while a line is
    /// in service.
    pub fn enforces_priority(&self) -> bool {
        self.driver.priority_count() != 0
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("priority_count", &self.driver.priority_count())
            .finish_non_exhaustive()
    }
}
