/// Approximate a byte count for display: `1 byte`, `512 bytes`,
/// `1.50 kilobytes`, `3 megabytes`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["byte", "kilobyte", "megabyte", "gigabyte"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if value.fract() == 0.0 {
        let whole = value as u64;
        if whole == 1 {
            format!("1 {}", UNITS[unit])
        } else {
            format!("{} {}s", whole, UNITS[unit])
        }
    } else {
        format!("{:.2} {}s", value, UNITS[unit])
    }
}
