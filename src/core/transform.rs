use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static NON_CODE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9-]+").expect("valid code pattern"));

static HL7_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    // YYYY[MM[DD[HH[MM[SS]]]]][.S][+/-ZZZZ]
    Regex::new(
        r"^(\d{4})(?:(\d{2})(?:(\d{2})(?:(\d{2})(?:(\d{2})(\d{2})?)?)?)?)?(\.\d+)?([+-]\d{4}|Z)?$",
    )
    .expect("valid HL7 pattern")
});

/// Value rewrite applied to an extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// Calendar date as `YYYY-MM-DD`.
    Date,
    /// Wall-clock time as `HH:MM:SS`; date-only input gives midnight.
    Time,
    /// Last segment of a reference such as `urn:uuid:1234` or `Patient/1234`.
    ReferenceId,
    /// Keeps digits and `-` only.
    DigitsOnly,
}

impl Transform {
    pub fn apply(self, value: &str) -> Option<String> {
        let output = match self {
            Transform::Date => parse_clinical_datetime(value)?
                .date()
                .format("%Y-%m-%d")
                .to_string(),
            Transform::Time => parse_clinical_datetime(value)?
                .time()
                .format("%H:%M:%S")
                .to_string(),
            Transform::ReferenceId => {
                let reference = value.trim();
                // versioned references: Patient/123/_history/2
                let reference = reference
                    .find("/_history/")
                    .map_or(reference, |at| &reference[..at]);
                reference
                    .rsplit([':', '/'])
                    .find(|segment| !segment.is_empty())?
                    .to_string()
            }
            Transform::DigitsOnly => NON_CODE_CHARS.replace_all(value, "").into_owned(),
        };
        if output.is_empty() {
            None
        } else {
            Some(output)
        }
    }
}

/// Parses the date/time spellings found in FHIR and CCDA documents.
///
/// Times are kept as written in the source; the offset is dropped, not applied.
pub fn parse_clinical_datetime(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_local());
    }

    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    if let Some(caps) = HL7_TIMESTAMP.captures(value) {
        let part = |index: usize, default: u32| -> Option<u32> {
            match caps.get(index) {
                Some(digits) => digits.as_str().parse().ok(),
                None => Some(default),
            }
        };
        let year = caps[1].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, part(2, 1)?, part(3, 1)?)?;
        let time = NaiveTime::from_hms_opt(part(4, 0)?, part(5, 0)?, part(6, 0)?)?;
        return Some(date.and_time(time));
    }

    const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date.and_time(NaiveTime::MIN));
        }
    }

    None
}
