//! Stateless conversions from raw ADC counts to physical values.

/// Maps `raw` onto `[0, 1]` between two reference counts.
///
/// The references may be given in either order (a capacitive probe reads
/// high when dry, so the dry reference is often the larger one). Equal
/// references yield 0.
pub fn normalize_reading(raw: u16, min_ref: u16, max_ref: u16) -> f32 {
    if min_ref == max_ref {
        return 0.0;
    }
    let (lo, hi) = if min_ref > max_ref {
        (max_ref, min_ref)
    } else {
        (min_ref, max_ref)
    };
    if raw <= lo {
        return 0.0;
    }
    if raw >= hi {
        return 1.0;
    }
    let span = f32::from(hi - lo);
    (f32::from(raw - lo) / span).clamp(0.0, 1.0)
}

/// Battery voltage behind a resistive divider `r1` (top) / `r2` (bottom).
pub fn battery_voltage(raw: u16, max_adc: u16, reference_voltage: f32, r1: f32, r2: f32) -> f32 {
    if max_adc == 0 || reference_voltage <= 0.0 || r2 <= 0.0 {
        return 0.0;
    }
    let at_pin = (f32::from(raw) / f32::from(max_adc)) * reference_voltage;
    at_pin * ((r1 + r2) / r2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn near(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() <= eps
    }

    #[test]
    fn normalize_hits_exact_bounds() {
        assert_eq!(normalize_reading(0, 0, 4095), 0.0);
        assert_eq!(normalize_reading(4095, 0, 4095), 1.0);
        assert_eq!(normalize_reading(5000, 0, 4095), 1.0);
        assert_eq!(normalize_reading(100, 200, 3000), 0.0);
    }

    #[test]
    fn normalize_midpoint_and_reversed_refs() {
        assert!(near(normalize_reading(2048, 0, 4095), 0.5, 0.01));
        assert!(near(normalize_reading(2048, 3000, 1000), 0.5, 0.01));
        assert_eq!(normalize_reading(3000, 3000, 1000), 1.0);
        assert_eq!(normalize_reading(1000, 3000, 1000), 0.0);
    }

    #[test]
    fn normalize_degenerate_span_is_zero() {
        assert_eq!(normalize_reading(0, 7, 7), 0.0);
        assert_eq!(normalize_reading(7, 7, 7), 0.0);
        assert_eq!(normalize_reading(u16::MAX, 7, 7), 0.0);
    }

    #[test]
    fn normalize_stays_in_unit_interval() {
        for (lo, hi) in [(0u16, 4095u16), (3100, 1200), (10, 11), (500, 65535)] {
            let (a, b) = (lo.min(hi), lo.max(hi));
            for raw in (a..=b).step_by(((b - a) as usize / 50).max(1)) {
                let v = normalize_reading(raw, lo, hi);
                assert!((0.0..=1.0).contains(&v), "raw={raw} lo={lo} hi={hi} v={v}");
            }
        }
    }

    #[test]
    fn battery_divider() {
        let v = battery_voltage(2048, 4095, 3.3, 100_000.0, 10_000.0);
        assert!(near(v, 18.15, 0.1), "{v}");
        let v = battery_voltage(2048, 4095, 3.3, 100_000.0, 100_000.0);
        assert!(near(v, 3.30, 0.01), "{v}");
    }

    #[test]
    fn battery_degenerate_parameters() {
        assert_eq!(battery_voltage(100, 0, 3.3, 1.0, 1.0), 0.0);
        assert_eq!(battery_voltage(100, 4095, 0.0, 1.0, 1.0), 0.0);
        assert_eq!(battery_voltage(100, 4095, 3.3, 1.0, 0.0), 0.0);
    }
}
