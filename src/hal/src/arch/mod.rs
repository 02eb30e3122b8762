#[cfg(target_arch = "x86_64")]
pub mod x86_64;


/// Identifier of the processor this code is running on. Indexes the
/// processor block array.
pub fn processor_id() -> usize {
    #[cfg(test)]
    {
        emulated::processor_id()
    }

    #[cfg(all(target_arch = "x86_64", not(test)))]
    {
        usize::try_from(x86_64::processor_id()).expect("hardware reported an oversized apic id")
    }

    #[cfg(not(any(target_arch = "x86_64", test)))]
    {
        unimplemented!()
    }
}
