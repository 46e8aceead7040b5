//! Common types used across the monument workspace

use crate::error::CommonError;
use serde::{Deserialize, Serialize};

// ============================================================================
// File Kinds
// ============================================================================

/// Kind of a RINEX file within one station session.
///
/// A complete upload group carries one file of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Observation data (`.yyO`, `_MO.rnx`)
    Observation,
    /// GPS navigation message (`.yyN`, `_GN.rnx`)
    GpsNavigation,
    /// GLONASS navigation message (`.yyG`, `_RN.rnx`)
    GlonassNavigation,
    /// Multi-constellation navigation message (`.yyP`, `_MN.rnx`)
    MixedNavigation,
}

impl FileKind {
    /// Every kind a complete upload group is expected to contain.
    pub const EXPECTED: [FileKind; 3] = [
        FileKind::Observation,
        FileKind::GpsNavigation,
        FileKind::GlonassNavigation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Observation => "observation",
            FileKind::GpsNavigation => "gps_navigation",
            FileKind::GlonassNavigation => "glonass_navigation",
            FileKind::MixedNavigation => "mixed_navigation",
        }
    }

    /// Human readable label used in report messages
    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Observation => "observation",
            FileKind::GpsNavigation => "GPS navigation",
            FileKind::GlonassNavigation => "GLONASS navigation",
            FileKind::MixedNavigation => "mixed navigation",
        }
    }

    /// Whether a file of this kind fills the `expected` slot of a group.
    /// A mixed navigation file stands in for both GPS and GLONASS.
    pub fn covers(&self, expected: FileKind) -> bool {
        *self == expected
            || (*self == FileKind::MixedNavigation
                && matches!(expected, FileKind::GpsNavigation | FileKind::GlonassNavigation))
    }

    /// Infer the kind of a file from its name.
    ///
    /// Accepts RINEX 2 short names (`STA10690.25o`) and RINEX 3 long names
    /// (`CBW100NLD_R_20210010000_01D_30S_MO.rnx`). Directory components are
    /// ignored.
    pub fn infer(file_name: &str) -> Option<FileKind> {
        split_rinex_name(file_name).map(|(_, kind)| kind)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FileKind {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observation" => Ok(FileKind::Observation),
            "gps_navigation" => Ok(FileKind::GpsNavigation),
            "glonass_navigation" => Ok(FileKind::GlonassNavigation),
            "mixed_navigation" => Ok(FileKind::MixedNavigation),
            other => Err(CommonError::UnknownFileKind(other.to_string())),
        }
    }
}

/// Base name shared by all sibling files of one session, upper-cased.
///
/// RINEX 2 names keep their stem (`STA10690`). RINEX 3 names keep the
/// `SSSSMRCCC_S_YYYYDDDHHMM_PPP` prefix; the sampling field only observation
/// files carry is dropped.
///
/// Returns `None` when the kind cannot be inferred.
pub fn rinex_base_name(file_name: &str) -> Option<String> {
    split_rinex_name(file_name).map(|(base, _)| base)
}

fn split_rinex_name(file_name: &str) -> Option<(String, FileKind)> {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim();
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }

    if ext.eq_ignore_ascii_case("rnx") {
        return split_long_name(stem);
    }

    // RINEX 2: two digit year followed by the type letter
    let bytes = ext.as_bytes();
    if bytes.len() != 3 || !bytes[0].is_ascii_digit() || !bytes[1].is_ascii_digit() {
        return None;
    }
    let kind = match bytes[2].to_ascii_lowercase() {
        b'o' => FileKind::Observation,
        b'n' => FileKind::GpsNavigation,
        b'g' => FileKind::GlonassNavigation,
        b'p' => FileKind::MixedNavigation,
        _ => return None,
    };
    Some((stem.to_ascii_uppercase(), kind))
}

/// `SSSSMRCCC_S_YYYYDDDHHMM_PPP[_FRU]_DT` without the extension
fn split_long_name(stem: &str) -> Option<(String, FileKind)> {
    let fields: Vec<&str> = stem.split('_').collect();
    if !(5..=6).contains(&fields.len()) {
        return None;
    }
    let widths_ok = fields[0].len() == 9
        && fields[1].len() == 1
        && fields[2].len() == 11
        && fields[2].bytes().all(|b| b.is_ascii_digit())
        && fields[3].len() == 3;
    if !widths_ok {
        return None;
    }

    let kind = match fields[fields.len() - 1].to_ascii_uppercase().as_str() {
        "MO" => FileKind::Observation,
        "GN" => FileKind::GpsNavigation,
        "RN" => FileKind::GlonassNavigation,
        "MN" => FileKind::MixedNavigation,
        _ => return None,
    };
    Some((fields[..4].join("_").to_ascii_uppercase(), kind))
}

// ============================================================================
// Report Messages
// ============================================================================

/// Severity of a user-visible outcome message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Success,
    Info,
    Warning,
    Danger,
}

impl std::fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageLevel::Success => write!(f, "success"),
            MessageLevel::Info => write!(f, "info"),
            MessageLevel::Warning => write!(f, "warning"),
            MessageLevel::Danger => write!(f, "danger"),
        }
    }
}

/// One line of a per-group outcome report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeMessage {
    #[serde(rename = "type")]
    pub level: MessageLevel,
    pub text: String,
}

impl OutcomeMessage {
    pub fn new(level: MessageLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Success, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Warning, text)
    }

    pub fn danger(text: impl Into<String>) -> Self {
        Self::new(MessageLevel::Danger, text)
    }

    /// Prefix the text with the file or group it refers to
    pub fn scoped(mut self, scope: &str) -> Self {
        self.text = format!("{}: {}", scope, self.text);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_rinex2_names() {
        assert_eq!(FileKind::infer("STA10690.25o"), Some(FileKind::Observation));
        assert_eq!(FileKind::infer("sta10690.25N"), Some(FileKind::GpsNavigation));
        assert_eq!(FileKind::infer("uploads/STA10690.25g"), Some(FileKind::GlonassNavigation));
        assert_eq!(FileKind::infer("STA10690.25d"), None);
        assert_eq!(FileKind::infer("notes.txt"), None);
        assert_eq!(FileKind::infer("README"), None);
    }

    #[test]
    fn test_infer_rinex3_names() {
        assert_eq!(
            FileKind::infer("CBW100NLD_R_20210010000_01D_30S_MO.rnx"),
            Some(FileKind::Observation)
        );
        assert_eq!(FileKind::infer("CBW100NLD_R_20210010000_01D_GN.rnx"), Some(FileKind::GpsNavigation));
        assert_eq!(FileKind::infer("CBW100NLD_R_20210010000_01D_RN.RNX"), Some(FileKind::GlonassNavigation));
        assert_eq!(FileKind::infer("CBW100NLD_R_20210010000_01D_MN.rnx"), Some(FileKind::MixedNavigation));
        assert_eq!(FileKind::infer("CBW100NLD_R_20210010000_01D_EN.rnx"), None);
        assert_eq!(FileKind::infer("CBW100NLD_01D_MO.rnx"), None);
        assert_eq!(FileKind::infer("CBW100NLD_R_2021001XXXX_01D_MO.rnx"), None);
    }

    #[test]
    fn test_base_name_shared_by_siblings() {
        let obs = rinex_base_name("sta10690.25o").unwrap();
        let nav = rinex_base_name("STA10690.25n").unwrap();
        let glo = rinex_base_name("C:\\data\\STA10690.25g").unwrap();
        let mixed = rinex_base_name("sta10690.25P").unwrap();
        assert_eq!(obs, "STA10690");
        assert_eq!(obs, nav);
        assert_eq!(obs, glo);
        assert_eq!(obs, mixed);
    }

    #[test]
    fn test_long_name_siblings_share_base() {
        let obs = rinex_base_name("CBW100NLD_R_20210010000_01D_30S_MO.rnx").unwrap();
        assert_eq!(obs, "CBW100NLD_R_20210010000_01D");
        assert_eq!(rinex_base_name("CBW100NLD_R_20210010000_01D_GN.rnx").unwrap(), obs);
        assert_eq!(rinex_base_name("cbw100nld_r_20210010000_01d_rn.rnx").unwrap(), obs);
        assert_eq!(rinex_base_name("CBW100NLD_R_20210010000_01D_MN.rnx").unwrap(), obs);
        assert_ne!(rinex_base_name("CBW100NLD_R_20210020000_01D_GN.rnx").unwrap(), obs);
    }

    #[test]
    fn test_mixed_navigation_covers_both_constellations() {
        assert!(FileKind::MixedNavigation.covers(FileKind::GpsNavigation));
        assert!(FileKind::MixedNavigation.covers(FileKind::GlonassNavigation));
        assert!(!FileKind::MixedNavigation.covers(FileKind::Observation));
        assert!(FileKind::GpsNavigation.covers(FileKind::GpsNavigation));
        assert!(!FileKind::GpsNavigation.covers(FileKind::GlonassNavigation));
    }

    #[test]
    fn test_file_kind_roundtrip_str() {
        for kind in [FileKind::MixedNavigation].into_iter().chain(FileKind::EXPECTED) {
            assert_eq!(kind.as_str().parse::<FileKind>().unwrap(), kind);
        }
        assert!("meteo".parse::<FileKind>().is_err());
    }

    #[test]
    fn test_outcome_message_serialization() {
        let msg = OutcomeMessage::warning("group incomplete").scoped("STA10690");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["text"], "STA10690: group incomplete");
    }
}
