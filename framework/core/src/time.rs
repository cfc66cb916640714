use std::time::Duration;

/// Current wall-clock time as a Unix timestamp in milliseconds. All raw report
/// timestamps use this clock.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a duration string from the configuration file.
///
/// Accepts one or more `<number><unit>` segments where the unit is `ms`, `s`,
/// `m` or `h`, for example `250ms`, `30s`, `5m` or `1h30m`.
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        anyhow::bail!("empty duration");
    }

    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        if digits.is_empty() {
            anyhow::bail!("invalid duration `{input}`: unit without a value");
        }
        let value: u64 = digits.parse()?;
        digits.clear();

        let millis = match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                value
            }
            's' => value * 1_000,
            'm' => value * 60_000,
            'h' => value * 3_600_000,
            _ => anyhow::bail!("invalid duration `{input}`: unknown unit `{c}`"),
        };
        total += Duration::from_millis(millis);
    }

    if !digits.is_empty() {
        anyhow::bail!("invalid duration `{input}`: value without a unit");
    }

    Ok(total)
}
