use chrono::NaiveTime;

use cinder::models::session::{parse_kill_date, Session, SessionField, WorkingHours};

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

#[test]
fn working_hours_parse_and_render() {
    let hours = WorkingHours::parse("09:00-17:30").unwrap();
    assert_eq!(hours.start, time(9, 0));
    assert_eq!(hours.end, time(17, 30));
    assert_eq!(hours.render(), "09:00-17:30");
}

#[test]
fn working_hours_reject_malformed() {
    assert!(WorkingHours::parse("0900-1730").is_err());
    assert!(WorkingHours::parse("09:00").is_err());
    assert!(WorkingHours::parse("25:00-17:00").is_err());
}

#[test]
fn working_hours_contains_daytime_window() {
    let hours = WorkingHours::parse("09:00-17:00").unwrap();
    assert!(hours.contains(time(12, 0)));
    assert!(hours.contains(time(9, 0)));
    assert!(hours.contains(time(17, 0)));
    assert!(!hours.contains(time(8, 59)));
    assert!(!hours.contains(time(20, 0)));
}

#[test]
fn working_hours_window_wraps_midnight() {
    let hours = WorkingHours::parse("22:00-06:00").unwrap();
    assert!(hours.contains(time(23, 30)));
    assert!(hours.contains(time(3, 0)));
    assert!(!hours.contains(time(12, 0)));
}

#[test]
fn kill_date_uses_operator_format() {
    let date = parse_kill_date("01/01/2026").unwrap();
    assert_eq!(date.to_string(), "2026-01-01");
    assert!(parse_kill_date("2026-01-01").is_err());
    assert!(parse_kill_date("13/45/2026").is_err());
}

#[test]
fn field_parse_accepts_known_fields() {
    assert_eq!(SessionField::parse("delay", "90").unwrap(), SessionField::Delay(90));
    assert_eq!(SessionField::parse("jitter", "0.5").unwrap(), SessionField::Jitter(0.5));
    assert_eq!(
        SessionField::parse("lost_limit", "10").unwrap(),
        SessionField::LostLimit(10)
    );
    assert_eq!(
        SessionField::parse("elevated", "true").unwrap(),
        SessionField::Elevated(true)
    );
}

#[test]
fn field_parse_rejects_unknown_field() {
    let err = SessionField::parse("favourite_color", "red").unwrap_err();
    assert!(err.to_string().contains("unknown session field"));
}

#[test]
fn field_parse_rejects_out_of_range_values() {
    assert!(SessionField::parse("delay", "0").is_err());
    assert!(SessionField::parse("delay", "soon").is_err());
    assert!(SessionField::parse("jitter", "1.5").is_err());
    assert!(SessionField::parse("jitter", "-0.1").is_err());
    assert!(SessionField::parse("name", "").is_err());
}

#[test]
fn empty_value_clears_optional_fields() {
    assert_eq!(SessionField::parse("kill_date", "").unwrap(), SessionField::KillDate(None));
    assert_eq!(
        SessionField::parse("working_hours", "").unwrap(),
        SessionField::WorkingHours(None)
    );
}

#[test]
fn generated_ids_are_short_and_distinct() {
    let a = Session::generate_id();
    let b = Session::generate_id();
    assert_eq!(a.len(), 8);
    assert_ne!(a, b);
}
