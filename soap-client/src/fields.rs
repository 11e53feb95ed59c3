//! Flat field extraction and UPnP time values.
//!
//! Control responses carry each output argument exactly once and never
//! nest one inside another, so the extractor here is a first-match scan
//! rather than an XML parser. Callers go through [`FieldExtractor`] so a
//! stricter implementation can be dropped in.

use crate::SoapError;

/// Pulls the text content of a single named field out of a response body.
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, xml: &str, tag: &str) -> Result<String, SoapError>;
}

/// First `<tag>` to the first `</tag>` after it. No namespace handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatchExtractor;

impl FieldExtractor for FirstMatchExtractor {
    fn extract(&self, xml: &str, tag: &str) -> Result<String, SoapError> {
        extract_field(xml, tag).map(str::to_string)
    }
}

/// Text strictly between the first `<tag>` and the first subsequent `</tag>`.
pub fn extract_field<'a>(xml: &'a str, tag: &str) -> Result<&'a str, SoapError> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");

    let start = xml
        .find(&open)
        .map(|i| i + open.len())
        .ok_or_else(|| SoapError::Parse(format!("Missing <{tag}> element")))?;
    let len = xml[start..]
        .find(&close)
        .ok_or_else(|| SoapError::Parse(format!("Missing </{tag}> element")))?;

    Ok(&xml[start..start + len])
}

/// Parse an `H:MM:SS` time value into milliseconds. Hours may have any
/// number of digits; fractional seconds are rejected.
pub fn parse_duration(text: &str) -> Result<u64, SoapError> {
    let mut seconds: u64 = 0;
    for token in text.trim().split(':') {
        let value: u64 = token
            .parse()
            .map_err(|_| SoapError::Parse(format!("Invalid time value: {text:?}")))?;
        seconds = seconds
            .checked_mul(60)
            .and_then(|s| s.checked_add(value))
            .ok_or_else(|| SoapError::Parse(format!("Time value out of range: {text:?}")))?;
    }
    seconds
        .checked_mul(1000)
        .ok_or_else(|| SoapError::Parse(format!("Time value out of range: {text:?}")))
}

/// Encode a millisecond offset as `HH:MM:SS` for a `REL_TIME` seek.
///
/// Hours are taken mod 24, so offsets of a day or more wrap.
pub fn format_seek_target(position_millis: u64) -> String {
    let total_seconds = position_millis / 1000;
    let hours = (total_seconds / 3600) % 24;
    let minutes = (total_seconds / 60) % 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_extract_field() {
        assert_eq!(extract_field("<Foo>bar</Foo>", "Foo").unwrap(), "bar");
        assert_eq!(extract_field("<Foo></Foo>", "Foo").unwrap(), "");
    }

    #[test]
    fn test_extract_field_missing_tag() {
        let err = extract_field("<Foo></Foo>", "Bar").unwrap_err();
        assert!(matches!(err, SoapError::Parse(_)));

        let err = extract_field("<Foo>unterminated", "Foo").unwrap_err();
        assert!(matches!(err, SoapError::Parse(_)));
    }

    #[test]
    fn test_extract_field_first_match_wins() {
        let xml = "<A>one</A><A>two</A>";
        assert_eq!(extract_field(xml, "A").unwrap(), "one");
    }

    #[test]
    fn test_extract_field_close_after_open() {
        // A stray close tag before the open tag must not produce a slice
        let xml = "</Volume><Volume>42</Volume>";
        assert_eq!(extract_field(xml, "Volume").unwrap(), "42");
    }

    #[test]
    fn test_first_match_extractor_from_response() {
        let xml = r#"<s:Envelope><s:Body><u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1"><CurrentVolume>37</CurrentVolume></u:GetVolumeResponse></s:Body></s:Envelope>"#;
        let extractor = FirstMatchExtractor;
        assert_eq!(extractor.extract(xml, "CurrentVolume").unwrap(), "37");
    }

    #[rstest]
    #[case("0:01:05", 65_000)]
    #[case("1:00:00", 3_600_000)]
    #[case("00:00:00", 0)]
    #[case("123:00:01", 442_801_000)]
    #[case("45", 45_000)]
    fn test_parse_duration(#[case] text: &str, #[case] expected: u64) {
        assert_eq!(parse_duration(text).unwrap(), expected);
    }

    #[rstest]
    #[case("NOT_IMPLEMENTED")]
    #[case("0:xx:05")]
    #[case("")]
    #[case("0:-1:00")]
    #[case("0:00:05.000")]
    fn test_parse_duration_rejects(#[case] text: &str) {
        assert!(matches!(parse_duration(text), Err(SoapError::Parse(_))));
    }

    #[rstest]
    #[case(90_000, "00:01:30")]
    #[case(0, "00:00:00")]
    #[case(3_599_999, "00:59:59")]
    #[case(86_400_000 + 61_000, "00:01:01")]
    fn test_format_seek_target(#[case] millis: u64, #[case] expected: &str) {
        assert_eq!(format_seek_target(millis), expected);
    }

    proptest! {
        #[test]
        fn seek_target_round_trips_mod_24h(millis in 0u64..10 * 86_400_000) {
            let target = format_seek_target(millis);
            prop_assert_eq!(target.len(), 8);
            let parsed = parse_duration(&target).unwrap();
            prop_assert_eq!(parsed, (millis / 1000 % 86_400) * 1000);
        }
    }
}
