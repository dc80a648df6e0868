//! RFC 1982 serial number arithmetic, used to compare RRSIG
//! inception/expiration timestamps against the current time without
//! breaking when the 32-bit field wraps around `year68` (`spec.md` §4.5).

/// `2^31`, the midpoint RFC 1982 compares serials against.
const SERIAL_BITS: u32 = 32;

/// True if `a` is strictly before `b` in RFC 1982 serial order.
pub fn serial_lt(a: u32, b: u32) -> bool {
    let _ = SERIAL_BITS;
    a != b && (b.wrapping_sub(a) as i32) > 0
}

/// True if `a` is strictly after `b` in RFC 1982 serial order.
pub fn serial_gt(a: u32, b: u32) -> bool {
    serial_lt(b, a)
}

/// Map a wall-clock `SystemTime` to the RFC 1982 serial used by RRSIG
/// inception/expiration fields: seconds since the Unix epoch, truncated to
/// 32 bits.
pub fn serial_from_unix_time(t: std::time::SystemTime) -> u32 {
    t.duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// `inception <= now <= expiration`, compared using RFC 1982 arithmetic.
pub fn time_valid(now: u32, inception: u32, expiration: u32) -> bool {
    !serial_lt(now, inception) && !serial_gt(now, expiration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_comparison() {
        assert!(serial_lt(1, 2));
        assert!(serial_gt(2, 1));
    }

    #[test]
    fn wraparound_past_year68() {
        let near_max = u32::MAX - 5;
        let wrapped = 10u32;
        assert!(serial_lt(near_max, wrapped));
    }

    #[test]
    fn time_window() {
        assert!(time_valid(50, 0, 100));
        assert!(!time_valid(150, 0, 100));
        assert!(!time_valid(0, 10, 100));
    }
}
