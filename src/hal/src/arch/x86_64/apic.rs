use crate::interrupts::Vector;
use crate::interrupts::controller::{ControllerDriver, InterruptCause, MagicCandy};
use bit_field::BitField;

#[repr(u32)]
#[derive(Debug, IntoPrimitive, Clone, Copy)]
#[allow(non_camel_case_types)]
#[rustfmt::skip]
pub enum Register {
    ID                  = 0x802,
    VERSION             = 0x803,
    TASK_PRIORITY       = 0x808,
    PROCESSOR_PRIORITY  = 0x80A,
    END_OF_INTERRUPT    = 0x80B,
    SPURIOUS_VECTOR     = 0x80F,
}

/// Reads from the model-specific register backing `register`.
#[inline(always)]
fn read_register(register: Register) -> u64 {
    let value_low: u64;
    let value_high: u64;

    // Safety: Reading from a model-specific register cannot create undefined behaviour.
    unsafe {
        core::arch::asm!(
            "rdmsr",
            in("ecx") u32::from(register),
            out("edx") value_high,
            out("eax") value_low,
            options(nostack, nomem, preserves_flags)
        );
    }

    (value_high << 32) | value_low
}

/// Writes `value` to the model-specific register backing `register`.
#[inline(always)]
fn write_register(register: Register, value: u64) {
    let value_low = value & 0xFFFF_FFFF;
    let value_high = value >> 32;

    // Safety: Writing to x2 APIC model-specific registers cannot create undefined behaviour.
    unsafe {
        core::arch::asm!(
            "wrmsr",
            in("ecx") u32::from(register),
            in("edx") value_high,
            in("eax") value_low,
            options(nostack, nomem, preserves_flags)
        );
    }
}

/// The processor-local interrupt controller, driven through its MSR window.
pub struct LocalApic;

/// Driver instance kernels install on each processor at bring-up.
pub static LOCAL_APIC: LocalApic = LocalApic;

impl LocalApic {
    /// Priority classes the hardware arbitrates. Vectors group sixteen to a
    /// class, and an in-service line masks its own class and everything below.
    pub const PRIORITY_CLASSES: u32 = 16;

    /// The initial ID of the local APIC device.
    pub fn id() -> u32 {
        u32::try_from(read_register(Register::ID)).expect("apic id exceeds register width")
    }

    /// Version of the APIC device.
    pub fn version() -> u8 {
        u8::try_from(read_register(Register::VERSION).get_bits(..8)).expect("version field is 8 bits")
    }

    /// Vector the APIC delivers when the line it was about to dispense became
    /// masked before the interrupt acknowledge cycle. Dispensing it does not
    /// set an in-service bit, so it must complete without an end-of-interrupt.
    pub fn spurious_vector() -> Vector {
        let vector = read_register(Register::SPURIOUS_VECTOR).get_bits(..8);

        Vector::new(u8::try_from(vector).expect("vector field is 8 bits"))
    }
}

impl ControllerDriver for LocalApic {
    fn acknowledge(&self, vector: &mut Vector, magic: &mut MagicCandy) -> InterruptCause {
        // The APIC latched the winning vector before the trap fired, so the
        // trap glue's vector is authoritative and doubles as the cookie.
        if *vector == Self::spurious_vector() {
            return InterruptCause::SpuriousInterrupt;
        }

        *magic = MagicCandy::from_raw(u32::from(vector.get()));
        InterruptCause::LineFired
    }

    fn end_of_interrupt(&self, _magic: MagicCandy) {
        write_register(Register::END_OF_INTERRUPT, 0x0);
    }

    fn supports_fast_eoi(&self) -> bool {
        true
    }

    fn fast_end_of_interrupt(&self) {
        write_register(Register::END_OF_INTERRUPT, 0x0);
    }

    fn priority_count(&self) -> u32 {
        Self::PRIORITY_CLASSES
    }
}
