/// Percentile with linear interpolation between closest ranks (the same
/// convention the snapshot tooling uses). Returns None for an empty slice.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }

    let frac = pos - lo as f64;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_no_quantile() {
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn single_value_is_its_own_quantile() {
        assert_eq!(quantile(&[7.0], 0.33), Some(7.0));
    }

    #[test]
    fn interpolates_between_ranks() {
        // Three values: pos = 0.33 * 2 = 0.66 -> 0.1 + 0.66 * 0.4.
        let v = [0.1, 0.5, 0.9];
        let q1 = quantile(&v, 0.33).unwrap();
        assert!((q1 - 0.364).abs() < 1e-12);

        // pos = 0.66 * 2 = 1.32 -> 0.5 + 0.32 * 0.4.
        let q2 = quantile(&v, 0.66).unwrap();
        assert!((q2 - 0.628).abs() < 1e-12);
    }

    #[test]
    fn unsorted_input_is_handled() {
        let v = [0.9, 0.1, 0.5];
        assert_eq!(quantile(&v, 0.0), Some(0.1));
        assert_eq!(quantile(&v, 1.0), Some(0.9));
    }
}
