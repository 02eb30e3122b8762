use crate::interrupts::Vector;
use spin::Once;

/// Software priority class of the current execution context on a processor.
///
/// Levels are totally ordered. A processor nominally at some level only
/// accepts interrupts whose vectors map strictly above it; everything else is
/// deferred until the level drops.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive, IntoPrimitive,
)]
pub enum RunLevel {
    /// Normal thread execution; everything is admissible.
    Low = 0,

    /// Software interrupt level the scheduler flush runs at.
    Dispatch = 1,

    Device2 = 2,
    Device3 = 3,
    Device4 = 4,
    Device5 = 5,
    Device6 = 6,
    Device7 = 7,
    Device8 = 8,
    Device9 = 9,
    Device10 = 10,
    Device11 = 11,

    /// Clock tick.
    Clock = 12,

    /// Inter-processor interrupts.
    Ipi = 13,

    /// Power failure notification.
    Power = 14,

    /// Masks every maskable source.
    High = 15,
}

impl RunLevel {
    /// Number of distinct run levels.
    pub const COUNT: usize = 16;

    /// Whether this is one of the device interrupt levels.
    pub fn is_device(self) -> bool {
        Self::Dispatch < self && self < Self::Clock
    }
}

/// Boot-supplied mapping from vector number to run level.
///
/// The dispatch core treats the installed map as an oracle. Vectors the
/// kernel never assigned read [`RunLevel::High`], so a misrouted line gets
/// dispatched (and reported by the chain walker) instead of deferred forever.
pub struct VectorMap {
    levels: [RunLevel; Vector::COUNT],
}

impl VectorMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            levels: [RunLevel::High; Vector::COUNT],
        }
    }

    /// Assigns `level` to `vector`, builder style. Usable in `const` context
    /// so the kernel can declare its routing as a compile-time table.
    #[must_use]
    #[allow(clippy::as_conversions)]
    pub const fn assign(mut self, vector: Vector, level: RunLevel) -> Self {
        self.levels[vector.get() as usize] = level;
        self
    }

    fn level_for(&self, vector: Vector) -> RunLevel {
        self.levels[usize::from(vector.get())]
    }
}

impl Default for VectorMap {
    fn default() -> Self {
        Self::new()
    }
}

static VECTOR_MAP: Once<VectorMap> = Once::new();

/// Installs the vector to run level mapping. Later installs are ignored.
pub fn install_vector_map(map: VectorMap) {
    VECTOR_MAP.call_once(|| {
        trace!("Vector to run level map installed.");

        map
    });
}

/// Run level `vector` dispatches at.
pub(crate) fn run_level_for(vector: Vector) -> RunLevel {
    VECTOR_MAP
        .get()
        .expect("vector map has not been installed")
        .level_for(vector)
}
