use std::time::Duration;

pub fn median(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }

    let mut sorted = durations.to_vec();
    sorted.sort();

    let mid = sorted.len() / 2;

    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(durations: &[Duration]) -> Option<Duration> {
    if durations.is_empty() {
        return None;
    }

    Some(durations.iter().sum::<Duration>() / durations.len() as u32)
}

pub fn std_deviation(durations: &[Duration]) -> Option<Duration> {
    let mean_secs = mean(durations)?.as_secs_f64();

    let variance = durations
        .iter()
        .map(|duration| {
            let diff = duration.as_secs_f64() - mean_secs;
            diff * diff
        })
        .sum::<f64>()
        / durations.len() as f64;

    Some(Duration::from_secs_f64(variance.sqrt()))
}

pub fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    #[test]
    fn test_median_odd_count() {
        assert_eq!(
            median(&ms(&[300, 45, 120])),
            Some(Duration::from_millis(120))
        );
    }

    #[test]
    fn test_median_even_count() {
        assert_eq!(
            median(&ms(&[10, 20, 30, 40])),
            Some(Duration::from_millis(25))
        );
    }

    #[test]
    fn test_median_empty() {
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&ms(&[10, 20, 30])), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_std_deviation_constant_samples() {
        assert_eq!(std_deviation(&ms(&[50, 50, 50])), Some(Duration::ZERO));
    }

    #[test]
    fn test_std_deviation_known_values() {
        // Population standard deviation of [2, 4, 4, 4, 5, 5, 7, 9] ms is 2 ms.
        let samples = ms(&[2, 4, 4, 4, 5, 5, 7, 9]);
        let deviation = std_deviation(&samples).unwrap();
        assert!((millis(deviation) - 2.0).abs() < 0.001);
    }
}
