use nut::utils::rational::Rational;
use nut::utils::timing::to_millis;

/// Formats `pts` ticks of `time_base` as `HH:MM:SS.mmm` without going
/// through floating point. Times beyond the millisecond range are shown as
/// raw ticks.
pub fn pts_str(pts: i64, time_base: Rational) -> String {
    let Ok(ms) = to_millis(pts, time_base) else {
        return format!("{pts} x {time_base}");
    };

    let sign = if ms < 0 { "-" } else { "" };
    let ms = ms.unsigned_abs();
    let hours = ms / 3_600_000;
    format!(
        "{sign}{hours:0width$}:{:02}:{:02}.{:03}",
        ms / 60_000 % 60,
        ms / 1000 % 60,
        ms % 1000,
        width = if hours >= 100 { 0 } else { 2 }
    )
}

#[test]
fn formats_exact_times() {
    assert_eq!(pts_str(0, Rational::new(1, 25)), "00:00:00.000");
    assert_eq!(pts_str(90_001, Rational::new(1, 25)), "01:00:00.040");
    assert_eq!(pts_str(48_000 * 61 + 48, Rational::new(1, 48000)), "00:01:01.001");
    assert_eq!(pts_str(-1500, Rational::MILLISECOND), "-00:00:01.500");
    assert_eq!(pts_str(367_000 * 1000, Rational::MILLISECOND), "101:56:40.000");
    assert_eq!(pts_str(i64::MAX, Rational::ONE), format!("{} x 1/1", i64::MAX));
}
