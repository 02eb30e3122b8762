pub mod apic;
pub mod instructions;

/// Gets the ID of the current hardware thread, as reported by the local
/// interrupt controller.
pub fn processor_id() -> u32 {
    apic::LocalApic::id()
}
