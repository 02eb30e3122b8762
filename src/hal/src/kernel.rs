use crate::{processor::ThreadRef, trap::TrapFrame};
use spin::Once;

/// Downward calls the dispatch core makes into the rest of the kernel.
///
/// Installed once at boot, the way a logging sink is. Every method may be
/// invoked from interrupt context.
pub trait KernelServices: Sync {
    /// Scheduler entry for a dispatch-level software pass. `trap_frame` is
    /// the frame of the interrupted context when one exists; replays and
    /// plain run-level lowering carry none.
    fn dispatch_software_interrupt(&self, trap_frame: Option<&mut TrapFrame>);

    /// Delivers pending user-mode signals to `thread`. Called with interrupts
    /// enabled, only when an interrupt taken at
    /// [`RunLevel::Low`](crate::runlevel::RunLevel::Low) came out of user
    /// mode.
    fn dispatch_pending_signals(&self, thread: ThreadRef, trap_frame: &mut TrapFrame);

    /// Current reading of the free-running time counter.
    fn read_time_counter(&self) -> u64;

    /// Time counter frequency in ticks per second.
    fn time_counter_frequency(&self) -> u64;
}

static SERVICES: Once<&'static dyn KernelServices> = Once::new();

/// Installs the kernel service sink. Later installs are ignored.
pub fn set_kernel_services(services: &'static dyn KernelServices) {
    SERVICES.call_once(|| {
        trace!("Kernel services installed.");

        services
    });
}

pub(crate) fn services() -> &'static dyn KernelServices {
    *SERVICES
        .get()
        .expect("kernel services have not been installed")
}
