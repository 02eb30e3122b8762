use core::arch::asm;

/// Enables interrupts for the current hardware thread.
#[inline(always)]
pub fn __sti() {
    // Safety: Caller is required to ensure enabling interrupts will not cause undefined behaviour.
    unsafe {
        asm!("sti", options(nostack, nomem));
    }
}

/// Disables interrupts for the current hardware thread.
#[inline(always)]
pub fn __cli() {
    // Safety: Caller is required to ensure disabling interrupts will not cause undefined behaviour.
    unsafe {
        asm!("cli", options(nostack, nomem));
    }
}

/// Reads the raw value of the flags register.
#[inline(always)]
pub fn __read_rflags() -> u64 {
    let value: u64;

    // Safety: Reading the flags register does not cause undefined behaviour.
    unsafe {
        asm!("pushfq", "pop {}", out(reg) value, options(nomem, preserves_flags));
    }

    value
}
