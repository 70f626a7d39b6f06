use rust_decimal::Decimal;
use switchboard_types::{QuotaLimits, QuotaWindow};

#[test]
fn quota_limits_round_trip() {
    let limits = QuotaLimits {
        requests_per_minute: Some(10),
        requests_per_hour: Some(100),
        requests_per_day: None,
        tokens_per_day: Some(1_000_000),
        cost_per_day: Some(Decimal::new(2500, 2)),
    };
    let json = serde_json::to_string(&limits).unwrap();
    let back: QuotaLimits = serde_json::from_str(&json).unwrap();
    assert_eq!(back, limits);
}

#[test]
fn missing_fields_mean_unlimited() {
    let limits: QuotaLimits = serde_json::from_str("{}").unwrap();
    assert!(limits.is_unlimited());
    assert_eq!(limits.requests_for(QuotaWindow::Minute), None);
}

#[test]
fn window_lengths_are_aligned_units() {
    assert_eq!(QuotaWindow::Minute.seconds(), 60);
    assert_eq!(QuotaWindow::Hour.seconds(), 3_600);
    assert_eq!(QuotaWindow::Day.seconds(), 86_400);
    assert_eq!(QuotaWindow::Hour.as_str(), "hour");
}
