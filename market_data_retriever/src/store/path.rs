//! Pure object-key construction from a path template and a date.

use chrono::{Datelike, NaiveDate};

/// Substitutes `{year}`, `{month}` and `{day}` (zero-padded) into a template.
///
/// No I/O and no validation of the result: the template is part of the
/// external archive contract and is taken at face value.
pub fn object_key(template: &str, date: NaiveDate) -> String {
    template
        .replace("{year}", &format!("{:04}", date.year()))
        .replace("{month}", &format!("{:02}", date.month()))
        .replace("{day}", &format!("{:02}", date.day()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_AGGS: &str = "us_stocks_sip/day_aggs_v1/{year}/{month}/{year}-{month}-{day}.csv.gz";

    #[test]
    fn substitutes_zero_padded_components() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            object_key(DAY_AGGS, date),
            "us_stocks_sip/day_aggs_v1/2024/01/2024-01-02.csv.gz"
        );
    }

    #[test]
    fn repeated_placeholders_all_resolve() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let key = object_key(DAY_AGGS, date);
        assert!(!key.contains('{'));
        assert!(key.ends_with("2024-12-31.csv.gz"));
    }

    #[test]
    fn template_without_placeholders_is_unchanged() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 5).unwrap();
        assert_eq!(object_key("static/path.csv", date), "static/path.csv");
    }
}
