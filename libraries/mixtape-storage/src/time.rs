use crate::error::{Result, StorageError};
use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn encode(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::corrupt(column, e))
}

pub(crate) fn decode_opt(column: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| decode(column, &r)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_width_sorts_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        assert!(encode(&a) < encode(&b));
        assert_eq!(encode(&a).len(), encode(&b).len());
        assert_eq!(decode("t", &encode(&b)).unwrap(), b);
    }
}
