use core::f64::consts::PI;

pub fn degrees_to_radians(degrees: f64) -> f64 {
    degrees * (PI / 180.0)
}

pub fn radians_to_degrees(radians: f64) -> f64 {
    radians * (180.0 / PI)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_right_angle() {
        assert!((degrees_to_radians(90.0) - PI / 2.0).abs() < 1e-12);
        assert!((radians_to_degrees(PI / 2.0) - 90.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_angles_keep_sign() {
        assert!(degrees_to_radians(-179.0) < 0.0);
        assert!((radians_to_degrees(degrees_to_radians(-179.0)) + 179.0).abs() < 1e-9);
    }
}
