//! `Prefer`, `Accept`, and `Range` header handling.

use crate::error::RestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnMode {
    Minimal,
    Representation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    Exact,
    Planned,
    Estimated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    MergeDuplicates,
    IgnoreDuplicates,
}

/// Parsed `Prefer` header values the data API honours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Preferences {
    pub return_mode: Option<ReturnMode>,
    pub count: Option<CountMode>,
    pub resolution: Option<Resolution>,
}

impl Preferences {
    pub fn wants_representation(&self) -> bool {
        self.return_mode == Some(ReturnMode::Representation)
    }
}

pub fn parse_prefer(header: Option<&str>) -> Result<Preferences, RestError> {
    let mut prefs = Preferences::default();
    let Some(raw) = header else {
        return Ok(prefs);
    };

    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match (key.trim(), value.trim()) {
            ("return", "representation") => set_once(&mut prefs.return_mode, ReturnMode::Representation)?,
            ("return", "minimal") => set_once(&mut prefs.return_mode, ReturnMode::Minimal)?,
            ("count", "exact") => set_once(&mut prefs.count, CountMode::Exact)?,
            ("count", "planned") => set_once(&mut prefs.count, CountMode::Planned)?,
            ("count", "estimated") => set_once(&mut prefs.count, CountMode::Estimated)?,
            ("resolution", "merge-duplicates") => {
                set_once(&mut prefs.resolution, Resolution::MergeDuplicates)?
            }
            ("resolution", "ignore-duplicates") => {
                set_once(&mut prefs.resolution, Resolution::IgnoreDuplicates)?
            }
            // Unknown preferences are ignored, as the upstream server does.
            _ => {}
        }
    }
    Ok(prefs)
}

fn set_once<T: PartialEq + Copy>(slot: &mut Option<T>, value: T) -> Result<(), RestError> {
    match slot {
        Some(existing) if *existing != value => Err(RestError::ContradictoryPreferences(
            "conflicting values for the same preference".into(),
        )),
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}

/// Body shape requested through `Accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    /// `application/vnd.pgrst.object+json`: exactly one object.
    SingleJson,
    Csv,
}

pub fn parse_accept(header: Option<&str>) -> ResponseFormat {
    let Some(raw) = header else {
        return ResponseFormat::Json;
    };
    for part in raw.split(',') {
        let mime = part.split(';').next().unwrap_or("").trim();
        match mime {
            "application/vnd.pgrst.object+json" => return ResponseFormat::SingleJson,
            "text/csv" => return ResponseFormat::Csv,
            _ => {}
        }
    }
    ResponseFormat::Json
}

/// Interpret `Range` / `Range-Unit: items` as offset and limit.
pub fn parse_range(
    range: Option<&str>,
    range_unit: Option<&str>,
) -> Result<Option<(u64, Option<u64>)>, RestError> {
    let Some(raw) = range else {
        return Ok(None);
    };
    if let Some(unit) = range_unit {
        if !unit.trim().eq_ignore_ascii_case("items") {
            return Err(RestError::InvalidRange(format!("unsupported unit: {unit}")));
        }
    }
    // Accept both "0-9" and the header form "items=0-9".
    let spec = raw.trim().strip_prefix("items=").unwrap_or(raw.trim());
    let (from, to) = spec
        .split_once('-')
        .ok_or_else(|| RestError::InvalidRange(raw.to_string()))?;
    let from: u64 = from
        .trim()
        .parse()
        .map_err(|_| RestError::InvalidRange(raw.to_string()))?;
    let to = to.trim();
    if to.is_empty() {
        return Ok(Some((from, None)));
    }
    let to: u64 = to
        .parse()
        .map_err(|_| RestError::InvalidRange(raw.to_string()))?;
    if to < from {
        return Err(RestError::InvalidRange(raw.to_string()));
    }
    Ok(Some((from, Some(to - from + 1))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_combined_prefer_header() {
        let prefs = parse_prefer(Some("return=representation, count=exact")).unwrap();
        assert_eq!(prefs.return_mode, Some(ReturnMode::Representation));
        assert_eq!(prefs.count, Some(CountMode::Exact));
        assert_eq!(prefs.resolution, None);
    }

    #[test]
    fn conflicting_preferences_are_rejected() {
        let err = parse_prefer(Some("return=representation, return=minimal"));
        assert!(matches!(err, Err(RestError::ContradictoryPreferences(_))));
    }

    #[test]
    fn repeated_identical_preference_is_fine() {
        let prefs = parse_prefer(Some("count=exact, count=exact")).unwrap();
        assert_eq!(prefs.count, Some(CountMode::Exact));
    }

    #[test]
    fn accept_selects_format() {
        assert_eq!(parse_accept(None), ResponseFormat::Json);
        assert_eq!(
            parse_accept(Some("application/vnd.pgrst.object+json")),
            ResponseFormat::SingleJson
        );
        assert_eq!(parse_accept(Some("text/csv")), ResponseFormat::Csv);
        assert_eq!(parse_accept(Some("application/json")), ResponseFormat::Json);
    }

    #[test]
    fn range_maps_to_offset_and_limit() {
        assert_eq!(parse_range(Some("0-9"), None).unwrap(), Some((0, Some(10))));
        assert_eq!(parse_range(Some("5-"), Some("items")).unwrap(), Some((5, None)));
        assert!(parse_range(Some("9-5"), None).is_err());
        assert!(parse_range(Some("abc"), None).is_err());
    }
}
