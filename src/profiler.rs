/// Perf counters.
///
/// Plain fields bumped on the hot paths: allocations by type, property
/// lookup cache hits/misses, interner traffic, and GC pause accounting.
/// Always compiled; the cost is an increment per event.

use std::fmt;

#[derive(Debug, Default, Clone)]
pub struct PerfCounters {
    pub alloc_count: u64,
    pub alloc_bytes: u64,
    pub object_new: u64,
    pub string_new: u64,
    pub env_new: u64,
    pub function_new: u64,
    pub string_intern_hits: u64,
    pub string_intern_misses: u64,
    pub lookup_cache_hits: u64,
    pub lookup_cache_misses: u64,
    pub collections: u64,
    pub objects_freed: u64,
    pub gc_pause_us_last: u64,
    pub gc_pause_us_total: u64,
}

impl PerfCounters {
    pub fn lookup_cache_hit_rate(&self) -> f64 {
        let total = self.lookup_cache_hits + self.lookup_cache_misses;
        if total == 0 {
            0.0
        } else {
            self.lookup_cache_hits as f64 / total as f64
        }
    }
}

impl fmt::Display for PerfCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Runtime Statistics ===")?;
        writeln!(f, "  Allocations:      {} ({} bytes)", self.alloc_count, self.alloc_bytes)?;
        writeln!(
            f,
            "  By type:          obj={} str={} env={} fn={}",
            self.object_new, self.string_new, self.env_new, self.function_new
        )?;
        writeln!(
            f,
            "  Intern cache:     {} hits / {} misses",
            self.string_intern_hits, self.string_intern_misses
        )?;
        writeln!(
            f,
            "  Lookup cache:     {:.1}% hit ({} / {})",
            self.lookup_cache_hit_rate() * 100.0,
            self.lookup_cache_hits,
            self.lookup_cache_hits + self.lookup_cache_misses
        )?;
        writeln!(
            f,
            "  GC:               {} collections, {} objects freed",
            self.collections, self.objects_freed
        )?;
        write!(
            f,
            "  GC pause:         {} µs (last), {} µs (total)",
            self.gc_pause_us_last, self.gc_pause_us_total
        )
    }
}
