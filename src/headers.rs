//! Metadata extraction from attachment download response headers.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, DATE, LAST_MODIFIED};

/// Capture timestamp for a downloaded attachment, UTC-normalized.
///
/// Prefers the `Date` header, falls back to `Last-Modified`, and uses the
/// current time when neither is present or parseable. Header values carry
/// RFC 2822 datetimes ("Thu, 04 Jan 2024 03:30:00 GMT").
pub fn header_datetime(headers: &HeaderMap) -> DateTime<Utc> {
    headers
        .get(DATE)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Filename declared in `Content-Disposition`, when one is declared.
///
/// The attachment syntax is either `attachment` or
/// `attachment; filename=<name>`; a bare or empty filename yields `None`.
pub fn attachment_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    for parameter in value.split(';').skip(1) {
        if let Some(name) = parameter.trim().strip_prefix("filename=") {
            let name = name.trim().trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn date_header_wins_and_is_utc() {
        let map = headers(&[("Date", "Thu, 04 Jan 2024 03:30:00 GMT")]);
        assert_eq!(
            header_datetime(&map),
            Utc.with_ymd_and_hms(2024, 1, 4, 3, 30, 0).unwrap()
        );
    }

    #[test]
    fn falls_back_to_last_modified_case_insensitively() {
        let map = headers(&[("last-modified", "Thu, 04 Jan 2024 16:00:00 GMT")]);
        assert_eq!(
            header_datetime(&map),
            Utc.with_ymd_and_hms(2024, 1, 4, 16, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_or_garbled_datetime_falls_back_to_now() {
        let before = Utc::now();
        let extracted = header_datetime(&headers(&[("x-header-no-date", "delilmama")]));
        assert!(extracted >= before && extracted <= Utc::now());

        let garbled = header_datetime(&headers(&[("Date", "not a datetime")]));
        assert!(garbled >= before && garbled <= Utc::now());
    }

    #[test]
    fn extracts_declared_filename() {
        let map = headers(&[("Content-Disposition", "attachment; filename=oatmilk.wav")]);
        assert_eq!(attachment_filename(&map).as_deref(), Some("oatmilk.wav"));

        let quoted = headers(&[("content-disposition", "attachment; filename=\"oat milk.wav\"")]);
        assert_eq!(attachment_filename(&quoted).as_deref(), Some("oat milk.wav"));
    }

    #[test]
    fn filename_is_absent_unless_declared() {
        for value in ["inline", "attachment", "attachment; filename="] {
            let map = headers(&[("content-disposition", value)]);
            assert_eq!(attachment_filename(&map), None, "value: {value}");
        }
        assert_eq!(attachment_filename(&headers(&[("content-type", "audio/wav")])), None);
    }
}
