use wa_dispatch::phone::{normalize_phone, DEFAULT_COUNTRY_PREFIX};

#[test]
fn test_normalize_formatted_local_number() {
    assert_eq!(
        normalize_phone("(61) 99999-0000", DEFAULT_COUNTRY_PREFIX).as_deref(),
        Some("+5561999990000")
    );
}

#[test]
fn test_normalize_keeps_existing_prefix() {
    assert_eq!(
        normalize_phone("5561999990000", DEFAULT_COUNTRY_PREFIX).as_deref(),
        Some("+5561999990000")
    );
    assert_eq!(
        normalize_phone("+55 61 99999 0000", DEFAULT_COUNTRY_PREFIX).as_deref(),
        Some("+5561999990000")
    );
}

#[test]
fn test_normalize_is_idempotent() {
    for raw in ["(61) 99999-0000", "+5561999990000", " 61 3333-4444 ", "123"] {
        let once = normalize_phone(raw, DEFAULT_COUNTRY_PREFIX).unwrap();
        let twice = normalize_phone(&once, DEFAULT_COUNTRY_PREFIX).unwrap();
        assert_eq!(once, twice, "input {raw:?}");
    }
}

#[test]
fn test_normalize_empty_is_rejected() {
    assert_eq!(normalize_phone("", DEFAULT_COUNTRY_PREFIX), None);
    assert_eq!(normalize_phone(" - ( ) ", DEFAULT_COUNTRY_PREFIX), None);
    assert_eq!(normalize_phone("+", DEFAULT_COUNTRY_PREFIX), None);
}

#[test]
fn test_normalize_other_country_prefix() {
    assert_eq!(normalize_phone("2025550100", "1").as_deref(), Some("+12025550100"));
}

#[test]
fn test_normalize_does_not_validate_digits() {
    assert_eq!(normalize_phone("abc", DEFAULT_COUNTRY_PREFIX).as_deref(), Some("+55abc"));
}
