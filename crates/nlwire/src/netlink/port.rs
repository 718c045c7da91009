//! Local port selection for netlink sockets.

/// Bits of the port taken from the seed (usually the process id).
const SEED_BITS: u32 = 22;
const SEED_MASK: u32 = (1 << SEED_BITS) - 1;
const COUNTER_MASK: u32 = 0x3FF;
const COUNTER_START: u32 = 32;

/// Generates candidate local port ids.
///
/// Ports have the form `(counter << 22) | (seed & 0x3FFFFF)` where the
/// 10-bit counter starts at 32 and wraps. Each socket opened by a process
/// therefore gets a distinct port that still identifies the process, leaving
/// the low counter values to the kernel's own assignment.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    counter: u32,
    seed: u32,
}

impl PortAllocator {
    /// Create an allocator with an explicit seed.
    pub fn new(seed: u32) -> Self {
        Self {
            counter: COUNTER_START,
            seed: seed & SEED_MASK,
        }
    }

    /// Create an allocator seeded with the current process id.
    pub fn for_process() -> Self {
        Self::new(std::process::id())
    }

    /// Return the next candidate port.
    pub fn next_port(&mut self) -> u32 {
        let port = (self.counter << SEED_BITS) | self.seed;
        self.counter = (self.counter + 1) & COUNTER_MASK;
        port
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::for_process()
    }
}
