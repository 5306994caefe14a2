use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;

/// ISO 7064 MOD 11-2 weights for the first 17 digits of a resident ID number.
const ID_WEIGHTS: [u32; 17] = [7, 9, 10, 5, 8, 4, 2, 1, 6, 3, 7, 9, 10, 5, 8, 4, 2];
const ID_CHECK_CHARS: [char; 11] = ['1', '0', 'X', '9', '8', '7', '6', '5', '4', '3', '2'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} field(s) failed validation", .0.len())]
pub struct ValidationErrors(pub Vec<FieldError>);

fn mobile_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^1[3-9][0-9]{9}$").expect("mobile pattern"))
}

fn landline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^0[0-9]{2,3}-?[0-9]{7,8}$").expect("landline pattern"))
}

fn id_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{17}[0-9Xx]$").expect("id number pattern"))
}

pub fn is_valid_phone(s: &str) -> bool {
    let t = s.trim();
    mobile_re().is_match(t) || landline_re().is_match(t)
}

/// 18-character resident ID: pattern, embedded birth date, then the check digit.
pub fn is_valid_id_number(s: &str) -> bool {
    let t = s.trim();
    if !id_number_re().is_match(t) {
        return false;
    }
    let Some(birth) = t.get(6..14) else {
        return false;
    };
    if NaiveDate::parse_from_str(birth, "%Y%m%d").is_err() {
        return false;
    }
    let sum: u32 = t
        .chars()
        .take(17)
        .zip(ID_WEIGHTS.iter())
        .map(|(c, w)| c.to_digit(10).unwrap_or(0) * w)
        .sum();
    let expected = ID_CHECK_CHARS[(sum % 11) as usize];
    t.chars()
        .nth(17)
        .map(|c| c.to_ascii_uppercase() == expected)
        .unwrap_or(false)
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Collects field errors for one form submission.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.to_string(),
            message: message.into(),
        });
    }

    pub fn required(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.push(field, "is required");
            return false;
        }
        true
    }

    pub fn phone(&mut self, field: &str, value: &str) {
        if self.required(field, value) && !is_valid_phone(value) {
            self.push(field, "is not a valid phone number");
        }
    }

    pub fn optional_phone(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !is_valid_phone(v) {
                self.push(field, "is not a valid phone number");
            }
        }
    }

    pub fn optional_id_number(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if !is_valid_id_number(v) {
                self.push(field, "is not a valid ID number");
            }
        }
    }

    pub fn optional_date(&mut self, field: &str, value: Option<&str>) {
        if let Some(v) = value {
            if parse_date(v).is_none() {
                self.push(field, "must be YYYY-MM-DD");
            }
        }
    }

    pub fn date(&mut self, field: &str, value: &str) -> Option<NaiveDate> {
        let parsed = parse_date(value);
        if parsed.is_none() {
            self.push(field, "must be YYYY-MM-DD");
        }
        parsed
    }

    pub fn time(&mut self, field: &str, value: &str) -> Option<NaiveTime> {
        let parsed = parse_time(value);
        if parsed.is_none() {
            self.push(field, "must be HH:MM");
        }
        parsed
    }

    pub fn price(&mut self, field: &str, value: f64) {
        if !value.is_finite() || value < 0.0 {
            self.push(field, "must be a non-negative amount");
        }
    }

    pub fn range_i64(&mut self, field: &str, value: i64, min: i64, max: i64) {
        if !(min..=max).contains(&value) {
            self.push(field, format!("must be in {}..={}", min, max));
        }
    }

    pub fn range_f64(&mut self, field: &str, value: f64, min: f64, max: f64) {
        if !value.is_finite() || value < min || value > max {
            self.push(field, format!("must be in {}..={}", min, max));
        }
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) {
        if !allowed.contains(&value) {
            self.push(field, format!("must be one of: {}", allowed.join(", ")));
        }
    }

    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_accepts_mobile_and_landline() {
        assert!(is_valid_phone("13812345678"));
        assert!(is_valid_phone("010-12345678"));
        assert!(is_valid_phone("07551234567"));
        assert!(!is_valid_phone("12812345678"));
        assert!(!is_valid_phone("1381234567"));
        assert!(!is_valid_phone("phone"));
    }

    #[test]
    fn id_number_check_digit() {
        assert!(is_valid_id_number("11010519491231002X"));
        assert!(is_valid_id_number("11010519491231002x"));
        // one digit changed
        assert!(!is_valid_id_number("11010519491231003X"));
        // impossible birth date
        assert!(!is_valid_id_number("11010519491331002X"));
        assert!(!is_valid_id_number("1101051949123100"));
    }

    #[test]
    fn only_ascii_digits_count() {
        let arabic_indic: String = std::iter::repeat('\u{0661}').take(17).collect();
        assert!(!is_valid_id_number(&format!("1{}", arabic_indic)));
        assert!(!is_valid_id_number(&format!("{}1", arabic_indic)));
        let nine: String = std::iter::repeat('\u{0661}').take(9).collect();
        assert!(!is_valid_phone(&format!("13{}", nine)));
        assert!(!is_valid_phone(&format!("010-{}", nine)));
    }

    #[test]
    fn validator_collects_every_field() {
        let mut v = Validator::new();
        v.required("name", "  ");
        v.phone("phone", "123");
        v.price("price", -1.0);
        let errs = v.finish().expect_err("should fail");
        let fields: Vec<&str> = errs.0.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "phone", "price"]);
    }

    #[test]
    fn time_and_date_parsing() {
        assert!(parse_time("09:30").is_some());
        assert!(parse_time("25:00").is_none());
        assert!(parse_date("2026-02-29").is_none());
        assert!(parse_date("2028-02-29").is_some());
    }
}
