/// Applies a device multiplier/divisor pair plus a fixed unit factor.
///
/// A divisor of zero means the device has not populated its scaling registers
/// yet; the value is unavailable rather than a division fault.
pub fn scale(raw_value: f64, multiplier: f64, divisor: f64, extra_factor: f64) -> Option<f64> {
    if divisor == 0.0 {
        return None;
    }
    Some(raw_value * multiplier / divisor * extra_factor)
}

/// Per-message scaling pair as reported by the meter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScalingFactors {
    pub multiplier: u64,
    pub divisor: u64,
}

impl ScalingFactors {
    pub fn new(multiplier: u64, divisor: u64) -> Self {
        Self { multiplier, divisor }
    }

    pub fn apply(&self, raw_value: f64, extra_factor: f64) -> Option<f64> {
        scale(raw_value, self.multiplier as f64, self.divisor as f64, extra_factor)
    }
}
