use bit_field::BitField;

bitflags! {
    /// Flags register image captured in a trap frame.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RFlags: u64 {
        const CARRY = 1 << 0;
        const PARITY = 1 << 2;
        const ADJUST = 1 << 4;
        const ZERO = 1 << 6;
        const SIGN = 1 << 7;
        const TRAP = 1 << 8;
        const INTERRUPT_FLAG = 1 << 9;
        const DIRECTION = 1 << 10;
        const OVERFLOW = 1 << 11;
    }
}

/// Hardware-pushed portion of an interrupt frame, as the trap vector glue
/// hands it to the dispatcher. Handler chains may receive and mutate it; the
/// core itself only inspects the privilege and flags images.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct TrapFrame {
    pub instruction_pointer: u64,
    pub code_segment: u64,
    pub rflags: u64,
    pub stack_pointer: u64,
    pub stack_segment: u64,
}

impl TrapFrame {
    /// Flags image at the time of the trap.
    pub fn flags(&self) -> RFlags {
        RFlags::from_bits_truncate(self.rflags)
    }

    /// Whether the trap interrupted user-mode execution. The requested
    /// privilege level rides in the low bits of the saved code selector.
    pub fn is_from_user_mode(&self) -> bool {
        self.code_segment.get_bits(0..2) == 3
    }

    /// Whether the interrupted context had interrupts enabled.
    pub fn interrupts_were_enabled(&self) -> bool {
        self.flags().contains(RFlags::INTERRUPT_FLAG)
    }
}
