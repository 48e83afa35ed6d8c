use std::ops::Range;

use sysinfo::System;
use tracing::debug;

use crate::consts::FALLBACK_AVAILABLE_MEMORY;
use crate::pipeline::config::MemoryConfig;
use crate::stack::StackEntry;

const MIB: u64 = 1024 * 1024;

/// Physical memory the engine may plan with, in bytes.
///
/// Uses the configured override when present, else asks the operating
/// system. Falls back to a fixed amount when the query reports nothing.
pub fn available_memory(config: &MemoryConfig) -> u64 {
    if let Some(mb) = config.available_memory_mb {
        return mb as u64 * MIB;
    }
    let mut sys = System::new();
    sys.refresh_memory();
    match sys.available_memory() {
        0 => FALLBACK_AVAILABLE_MEMORY,
        bytes => bytes,
    }
}

/// Rows of each file kept resident per strip.
pub fn buffer_rows(config: &MemoryConfig, available: u64, files: usize, width: usize, roi_height: usize) -> usize {
    let buffer_bytes = if config.auto_memory_size {
        (config.auto_memory_limit * available as f64 / files.max(1) as f64) as u64
    } else {
        config.buffer_size_mb as u64 * MIB
    };
    let row_bytes = (width * std::mem::size_of::<f32>()).max(1) as u64;
    ((buffer_bytes / row_bytes) as usize).clamp(1, roi_height.max(1))
}

/// Bytes of rejection stacks needed for one image row.
pub fn stack_row_bytes(width: usize, files: usize, with_slopes: bool) -> usize {
    let slope = if with_slopes { std::mem::size_of::<f32>() } else { 0 };
    width * (files * std::mem::size_of::<StackEntry>() + std::mem::size_of::<usize>() + slope)
}

/// Rows processed together within one strip.
pub fn rows_per_chunk(
    config: &MemoryConfig,
    available: u64,
    threads: usize,
    row_bytes: usize,
    buffer_rows: usize,
) -> usize {
    let stack_bytes = if config.auto_memory_size {
        (config.auto_memory_limit * available as f64) as u64
    } else {
        config.stack_size_mb as u64 * MIB
    };
    let by_memory = (stack_bytes / row_bytes.max(1) as u64) as usize;
    let rows = threads.max(by_memory).min(buffer_rows);
    debug!(rows, threads, by_memory, buffer_rows, "rows per chunk");
    rows.max(1)
}

/// Split `items` into at most `threads` contiguous ranges of near-equal
/// length; the first ranges take the remainder.
pub fn optimal_thread_loads(items: usize, threads: usize) -> Vec<Range<usize>> {
    let threads = threads.clamp(1, items.max(1));
    let base = items / threads;
    let extra = items % threads;
    let mut ranges = Vec::with_capacity(threads);
    let mut start = 0;
    for t in 0..threads {
        let len = base + usize::from(t < extra);
        if len == 0 {
            break;
        }
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Workers admitted for the large-scale rejection pass.
///
/// Each worker holds one mask, the transform layers and the dilated result,
/// within the auto memory limit of the available memory.
pub fn large_scale_workers(config: &MemoryConfig, available: u64, pixels: usize, layers: usize) -> usize {
    let budget = (config.auto_memory_limit * available as f64) as u64;
    let per_thread = (pixels * (1 + 4 * (1 + layers))).max(1) as u64;
    ((budget / per_thread) as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_cover_all_items() {
        let loads = optimal_thread_loads(10, 4);
        assert_eq!(loads, vec![0..3, 3..6, 6..8, 8..10]);
        assert_eq!(optimal_thread_loads(2, 8), vec![0..1, 1..2]);
        assert!(optimal_thread_loads(0, 4).is_empty());
    }

    #[test]
    fn buffer_rows_are_clamped() {
        let config = MemoryConfig {
            auto_memory_size: false,
            buffer_size_mb: 1,
            ..MemoryConfig::default()
        };
        // 1 MiB / (1024 * 4) = 256 rows
        assert_eq!(buffer_rows(&config, 0, 10, 1024, 10_000), 256);
        assert_eq!(buffer_rows(&config, 0, 10, 1024, 100), 100);
        assert_eq!(buffer_rows(&config, 0, 10, 1 << 30, 100), 1);
    }

    #[test]
    fn large_scale_workers_respect_memory_limit() {
        let config = MemoryConfig {
            auto_memory_limit: 0.5,
            ..MemoryConfig::default()
        };
        // 100 pixels, 2 layers: 1300 bytes per worker
        assert_eq!(large_scale_workers(&config, 13_000, 100, 2), 5);
        assert_eq!(large_scale_workers(&config, 100, 100, 2), 1);
    }
}
