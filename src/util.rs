pub fn mean(data: &[f64]) -> Option<f64> {
    let sum = data.iter().sum::<f64>();
    let count = data.len();

    match count {
        positive if positive > 0 => Some(sum / count as f64),
        _ => None,
    }
}

/// `round(100 * part / whole)`, 0 when `whole` is 0
pub fn percentage(part: usize, whole: usize) -> u32 {
    match whole {
        0 => 0,
        w => ((100 * part) as f64 / w as f64).round().min(100.0) as u32,
    }
}
