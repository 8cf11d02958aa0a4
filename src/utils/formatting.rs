pub const MIB: u64 = 1024 * 1024;

pub fn format_memory_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= 10 * GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else {
        format!("{}MB", bytes / MIB)
    }
}

/// Whole MiB, truncated.
pub fn bytes_to_mib(bytes: u64) -> u64 {
    bytes / MIB
}

pub fn bytes_to_mib_f64(bytes: u64) -> f64 {
    bytes as f64 / MIB as f64
}
