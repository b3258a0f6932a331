//! Small descriptive statistics shared by the quality report and the models.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population (`ddof = 0`) or sample (`ddof = 1`) standard deviation.
pub fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    let m = mean(values)?;
    let n = values.len().checked_sub(ddof).filter(|&n| n > 0)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / n as f64).sqrt())
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Counts values more than `limit` sample standard deviations from the mean.
pub fn count_outliers(values: &[f64], limit: f64) -> usize {
    let (Some(m), Some(sd)) = (mean(values), std_dev(values, 1)) else {
        return 0;
    };
    if sd == 0.0 {
        return 0;
    }

    values
        .iter()
        .filter(|&&v| ((v - m) / sd).abs() > limit)
        .count()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn descriptive_statistics() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];

        assert_eq!(mean(&v), Some(5.0));
        assert_eq!(std_dev(&v, 0), Some(2.0));
        assert_eq!(median(&v), Some(4.5));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));

        assert_eq!(mean(&[]), None);
        assert_eq!(std_dev(&[1.0], 1), None);
    }

    #[test]
    fn outliers_need_spread() {
        let mut v = vec![10.0; 30];
        assert_eq!(count_outliers(&v, 3.0), 0);

        v.push(1000.0);
        assert_eq!(count_outliers(&v, 3.0), 1);
    }
}
