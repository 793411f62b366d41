/// Runtime configuration.
///
/// Every tunable the core consults lives here. Overridable from the environment
/// (PRISM_* variables, parsed by hand); embedders may also construct an
/// `RtConf` directly and hand it to `Vm::with_conf`.
///
/// Properties by subsystem:
///   GC            — gc_min_threshold, gc_growth_factor, gc_stress
///   Strings       — intern_cache_size (power of two)
///   Events        — event_capacity
///   Specialization— spec_hot_threshold, unboxed_hot_threshold,
///                   spec_guard_miss_max, disable_specialization,
///                   spec_discard_on_gc
///   Environments  — arguments_aliasing

#[derive(Debug, Clone)]
pub struct RtConf {
    /// Floor for the adaptive GC threshold, in bytes.
    pub gc_min_threshold: usize,
    /// Next threshold = live bytes after sweep × this factor.
    pub gc_growth_factor: f64,
    /// Collect at every safe point. Testing aid; brutal in production.
    pub gc_stress: bool,
    /// Slots in the open-addressed string intern table. Power of two.
    pub intern_cache_size: usize,
    /// Capacity of the event ring; the oldest entry is dropped on overflow.
    pub event_capacity: usize,
    /// Calls before a function is eligible for the statement-bytecode tier.
    pub spec_hot_threshold: u32,
    /// Calls before a function is eligible for the unboxed numeric tier.
    pub unboxed_hot_threshold: u32,
    /// Consecutive guard misses before a tier is discarded.
    pub spec_guard_miss_max: u32,
    /// Kill switch: never build or run specialized tiers.
    pub disable_specialization: bool,
    /// Drop all lowered tier code during sweep.
    pub spec_discard_on_gc: bool,
    /// Mirror writes to aliased parameters into the `arguments` object.
    /// Off by default: `arguments` is a snapshot.
    pub arguments_aliasing: bool,
}

impl Default for RtConf {
    fn default() -> Self {
        RtConf {
            gc_min_threshold: 256 * 1024,
            gc_growth_factor: 2.0,
            gc_stress: false,
            intern_cache_size: 512,
            event_capacity: 64,
            spec_hot_threshold: 64,
            unboxed_hot_threshold: 128,
            spec_guard_miss_max: 8,
            disable_specialization: false,
            spec_discard_on_gc: false,
            arguments_aliasing: false,
        }
    }
}

impl RtConf {
    /// Defaults, then PRISM_* environment overrides.
    pub fn from_env() -> Self {
        let mut conf = RtConf::default();
        conf.apply_env();
        conf
    }

    fn apply_env(&mut self) {
        read_usize("PRISM_GC_MIN_THRESHOLD", &mut self.gc_min_threshold);
        read_f64("PRISM_GC_GROWTH_FACTOR", &mut self.gc_growth_factor);
        read_bool("PRISM_GC_STRESS", &mut self.gc_stress);
        read_usize("PRISM_INTERN_CACHE_SIZE", &mut self.intern_cache_size);
        read_usize("PRISM_EVENT_CAPACITY", &mut self.event_capacity);
        read_u32("PRISM_SPEC_HOT_THRESHOLD", &mut self.spec_hot_threshold);
        read_u32("PRISM_UNBOXED_HOT_THRESHOLD", &mut self.unboxed_hot_threshold);
        read_u32("PRISM_SPEC_GUARD_MISS_MAX", &mut self.spec_guard_miss_max);
        read_bool("PRISM_DISABLE_SPECIALIZATION", &mut self.disable_specialization);
        read_bool("PRISM_SPEC_DISCARD_ON_GC", &mut self.spec_discard_on_gc);
        read_bool("PRISM_ARGUMENTS_ALIASING", &mut self.arguments_aliasing);
        self.normalize();
    }

    /// Clamp values the rest of the runtime assumes: a sane growth
    /// factor, power-of-two cache size, nonzero ring capacity.
    pub fn normalize(&mut self) {
        if !(self.gc_growth_factor.is_finite()) || self.gc_growth_factor < 1.0 {
            self.gc_growth_factor = 2.0;
        }
        if self.gc_min_threshold == 0 {
            self.gc_min_threshold = 256 * 1024;
        }
        if self.intern_cache_size == 0 {
            self.intern_cache_size = 512;
        } else if !self.intern_cache_size.is_power_of_two() {
            self.intern_cache_size = self.intern_cache_size.next_power_of_two();
        }
        if self.event_capacity == 0 {
            self.event_capacity = 64;
        }
        if self.spec_guard_miss_max == 0 {
            self.spec_guard_miss_max = 1;
        }
    }
}

fn read_usize(key: &str, out: &mut usize) {
    if let Ok(s) = std::env::var(key) {
        if let Ok(v) = s.trim().parse() {
            *out = v;
        }
    }
}

fn read_u32(key: &str, out: &mut u32) {
    if let Ok(s) = std::env::var(key) {
        if let Ok(v) = s.trim().parse() {
            *out = v;
        }
    }
}

fn read_f64(key: &str, out: &mut f64) {
    if let Ok(s) = std::env::var(key) {
        if let Ok(v) = s.trim().parse() {
            *out = v;
        }
    }
}

fn read_bool(key: &str, out: &mut bool) {
    if let Ok(s) = std::env::var(key) {
        match s.trim() {
            "1" | "on" | "true" | "yes" => *out = true,
            "0" | "off" | "false" | "no" => *out = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let c = RtConf::default();
        assert_eq!(c.gc_min_threshold, 256 * 1024);
        assert_eq!(c.gc_growth_factor, 2.0);
        assert_eq!(c.event_capacity, 64);
        assert!(!c.arguments_aliasing);
    }

    #[test]
    fn normalize_rounds_intern_size_to_power_of_two() {
        let mut c = RtConf::default();
        c.intern_cache_size = 300;
        c.normalize();
        assert_eq!(c.intern_cache_size, 512);
    }

    #[test]
    fn normalize_rejects_degenerate_growth() {
        let mut c = RtConf::default();
        c.gc_growth_factor = 0.25;
        c.normalize();
        assert_eq!(c.gc_growth_factor, 2.0);
    }
}
