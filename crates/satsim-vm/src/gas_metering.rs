use std::cell::Cell;

/// Gas schedule for host-side operations.
///
/// The wasmtime engine meters instructions through fuel; the scripted
/// engine charges these flat costs instead.
#[derive(Debug, Clone, Copy)]
pub struct GasSchedule {
    // Entrypoints
    pub entrypoint: u64,      // 10,000

    // Storage
    pub storage_read: u64,    // 200
    pub storage_write: u64,   // 5,000

    // Calls & deployment
    pub call_base: u64,       // 700
    pub deploy: u64,          // 32,000

    // Logs & events
    pub log_base: u64,        // 375
    pub log_per_byte: u64,    // 8
    pub event: u64,           // 375
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            entrypoint: 10_000,

            storage_read: 200,
            storage_write: 5_000,

            call_base: 700,
            deploy: 32_000,

            log_base: 375,
            log_per_byte: 8,
            event: 375,
        }
    }
}

impl GasSchedule {
    /// Cost of a log line of `len` bytes.
    pub fn log_cost(&self, len: usize) -> u64 {
        self.log_base
            .saturating_add(self.log_per_byte.saturating_mul(len as u64))
    }
}

/// Mirror of one instance's cumulative gas counter, kept on the host side.
///
/// Updated by the bridge after every boundary crossing. Once frozen (at
/// disposal) later records are ignored.
#[derive(Debug, Default)]
pub struct GasCounter {
    current: Cell<u64>,
    frozen: Cell<Option<u64>>,
}

impl GasCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the engine's latest cumulative value.
    pub fn record(&self, cumulative: u64) {
        if self.frozen.get().is_none() {
            self.current.set(cumulative);
        }
    }

    /// Start over for a fresh instance. Also unfreezes.
    pub fn reset(&self) {
        self.current.set(0);
        self.frozen.set(None);
    }

    pub fn current(&self) -> u64 {
        self.current.get()
    }

    /// Gas consumed since `before`. Never negative.
    pub fn delta_since(&self, before: u64) -> u64 {
        self.current.get().saturating_sub(before)
    }

    pub fn freeze(&self) {
        if self.frozen.get().is_none() {
            self.frozen.set(Some(self.current.get()));
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Final value if frozen, otherwise the live counter.
    pub fn value(&self) -> u64 {
        self.frozen.get().unwrap_or_else(|| self.current.get())
    }
}
