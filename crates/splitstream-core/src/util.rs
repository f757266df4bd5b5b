//! Small shared helpers.

const SUFFIXES: [&str; 6] = ["", "K", "M", "G", "T", "P"];

/// Human-readable representation of a byte count, e.g. `1.50MB`.
pub fn pretty_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < SUFFIXES.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{:.2}{}B", value, SUFFIXES[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretty_size_bytes() {
        assert_eq!(pretty_size(0), "0.00B");
        assert_eq!(pretty_size(512), "512.00B");
    }

    #[test]
    fn test_pretty_size_kilobytes() {
        assert_eq!(pretty_size(1024), "1.00KB");
        assert_eq!(pretty_size(1536), "1.50KB");
    }

    #[test]
    fn test_pretty_size_megabytes() {
        assert_eq!(pretty_size(524_288_000), "500.00MB");
    }

    #[test]
    fn test_pretty_size_caps_at_petabytes() {
        assert_eq!(pretty_size(u64::MAX), "16384.00PB");
    }
}
