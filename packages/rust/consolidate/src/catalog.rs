//! Versioned table of canonical review areas and the label prefixes that map to them.
//!
//! Catalogs are data, not control flow: a new review cycle ships a new TOML
//! file (or a new built-in), and the engine picks it up unchanged.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use cortap_shared::{CatalogSection, CortapError, Result, expand_home};

/// Dash variants (hyphen, en-dash, em-dash, figure dash, minus) treated as spaces.
static DASHES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-\u{2012}\u{2013}\u{2014}\u{2212}]").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Normalize a label prefix for lookup: uppercase, dashes to spaces, whitespace collapsed.
pub fn normalize_key(raw: &str) -> String {
    let upper = raw.to_uppercase();
    let dashless = DASHES.replace_all(&upper, " ");
    WHITESPACE.replace_all(dashless.trim(), " ").into_owned()
}

/// Text before the first `:` of a category label, or `None` when there is no delimiter.
pub fn label_prefix(label: &str) -> Option<&str> {
    let (prefix, _) = label.split_once(':')?;
    let prefix = prefix.trim();
    (!prefix.is_empty()).then_some(prefix)
}

/// On-disk catalog shape.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    version: String,
    areas: Vec<String>,
    #[serde(default)]
    prefixes: BTreeMap<String, String>,
}

/// Canonical area set (ordered) plus the normalized prefix → area lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaCatalog {
    version: String,
    areas: Vec<String>,
    prefixes: BTreeMap<String, String>,
}

impl AreaCatalog {
    /// Build a catalog. Prefix keys are normalized; every target must be a listed area.
    pub fn new<I, K, V>(version: impl Into<String>, areas: Vec<String>, prefixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let version = version.into();
        if areas.is_empty() {
            return Err(CortapError::config(format!(
                "catalog '{version}' lists no review areas"
            )));
        }

        let mut seen = HashSet::new();
        for area in &areas {
            if !seen.insert(area.as_str()) {
                return Err(CortapError::config(format!(
                    "catalog '{version}' lists area '{area}' twice"
                )));
            }
        }

        let mut normalized = BTreeMap::new();
        for (key, target) in prefixes {
            let target = target.into();
            if !seen.contains(target.as_str()) {
                return Err(CortapError::config(format!(
                    "catalog '{version}' maps prefix '{}' to unknown area '{target}'",
                    key.as_ref()
                )));
            }
            normalized.insert(normalize_key(key.as_ref()), target);
        }

        Ok(Self {
            version,
            areas,
            prefixes: normalized,
        })
    }

    /// Parse a catalog from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(content)
            .map_err(|e| CortapError::config(format!("invalid catalog: {e}")))?;
        Self::new(file.version, file.areas, file.prefixes)
    }

    /// Load a catalog file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CortapError::io(path, e))?;
        let catalog = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), version = %catalog.version, areas = catalog.len(), "loaded catalog");
        Ok(catalog)
    }

    /// The configured catalog file, or the built-in FY26 catalog when none is set.
    pub fn from_config(section: &CatalogSection) -> Result<Self> {
        match &section.path {
            Some(path) => Self::load(&expand_home(path)),
            None => Ok(Self::fy26()),
        }
    }

    /// Built-in FY26 catalog: 21 review areas.
    pub fn fy26() -> Self {
        let areas: Vec<String> = FY26_AREAS.iter().map(|a| a.to_string()).collect();
        let prefixes = FY26_PREFIXES
            .iter()
            .map(|(k, v)| (normalize_key(k), v.to_string()))
            .collect();
        Self {
            version: "fy26".into(),
            areas,
            prefixes,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Canonical areas in catalog order.
    pub fn areas(&self) -> &[String] {
        &self.areas
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// Normalized prefix table, for display.
    pub fn prefixes(&self) -> &BTreeMap<String, String> {
        &self.prefixes
    }

    /// Position of an area in catalog order.
    pub fn position(&self, area: &str) -> Option<usize> {
        self.areas.iter().position(|a| a == area)
    }

    /// Look up a raw prefix (normalized before lookup).
    pub fn area_for_prefix(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(&normalize_key(prefix)).map(String::as_str)
    }

    /// Map a full category label such as `LEGAL : L2` to its canonical area.
    pub fn area_for_label(&self, label: &str) -> Option<&str> {
        self.area_for_prefix(label_prefix(label)?)
    }
}

const FY26_AREAS: [&str; 21] = [
    "Legal",
    "Financial Management and Capacity",
    "Technical Capacity - Award Management",
    "Technical Capacity - Program Management and Subrecipient Oversight",
    "Technical Capacity - Project Management",
    "Transit Asset Management",
    "Satisfactory Continuing Control",
    "Maintenance",
    "Procurement",
    "Americans with Disabilities Act (ADA) - General",
    "Americans with Disabilities Act (ADA) - Complementary Paratransit",
    "School Bus",
    "Charter Bus",
    "Drug-Free Workplace Act",
    "Drug and Alcohol Program",
    "Section 5307 Program Requirements",
    "Section 5310 Program Requirements",
    "Section 5311 Program Requirements",
    "Public Transportation Agency Safety Plan (PTASP)",
    "Cybersecurity",
    "Title VI",
];

// Dash and spacing variants collapse under `normalize_key`.
const FY26_PREFIXES: &[(&str, &str)] = &[
    ("LEGAL", "Legal"),
    ("FINANCIAL MANAGEMENT", "Financial Management and Capacity"),
    ("FINANCIAL MANAGEMENT AND CAPACITY", "Financial Management and Capacity"),
    ("TECHNICAL CAPACITY – AWARD MANAGEMENT", "Technical Capacity - Award Management"),
    (
        "TECHNICAL CAPACITY – PROGRAM MANAGEMENT",
        "Technical Capacity - Program Management and Subrecipient Oversight",
    ),
    (
        "TECHNICAL CAPACITY – PROGRAM MANAGEMENT AND SUBRECIPIENT OVERSIGHT",
        "Technical Capacity - Program Management and Subrecipient Oversight",
    ),
    ("TECHNICAL CAPACITY – PROJECT MANAGEMENT", "Technical Capacity - Project Management"),
    ("TRANSIT ASSET MANAGEMENT", "Transit Asset Management"),
    ("SATISFACTORY CONTINUING CONTROL", "Satisfactory Continuing Control"),
    ("MAINTENANCE", "Maintenance"),
    ("PROCUREMENT", "Procurement"),
    ("ADA GENERAL", "Americans with Disabilities Act (ADA) - General"),
    ("ADA – GENERAL", "Americans with Disabilities Act (ADA) - General"),
    (
        "ADA COMPLEMENTARY PARATRANSIT",
        "Americans with Disabilities Act (ADA) - Complementary Paratransit",
    ),
    ("SCHOOL BUS", "School Bus"),
    ("CHARTER BUS", "Charter Bus"),
    ("DRUG-FREE WORKPLACE ACT", "Drug-Free Workplace Act"),
    ("DRUG AND ALCOHOL PROGRAM", "Drug and Alcohol Program"),
    ("SECTION 5307 PROGRAM REQUIREMENTS", "Section 5307 Program Requirements"),
    ("SECTION 5310 PROGRAM REQUIREMENTS", "Section 5310 Program Requirements"),
    ("SECTION 5311 PROGRAM REQUIREMENTS", "Section 5311 Program Requirements"),
    (
        "PUBLIC TRANSPORTATION AGENCY SAFETY PLAN",
        "Public Transportation Agency Safety Plan (PTASP)",
    ),
    ("PTASP", "Public Transportation Agency Safety Plan (PTASP)"),
    ("CYBERSECURITY", "Cybersecurity"),
    ("TITLE VI", "Title VI"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fy26_has_21_areas_and_valid_targets() {
        let catalog = AreaCatalog::fy26();
        assert_eq!(catalog.len(), 21);
        assert_eq!(catalog.version(), "fy26");
        for target in catalog.prefixes().values() {
            assert!(catalog.position(target).is_some(), "unknown target {target}");
        }
    }

    #[test]
    fn normalize_key_collapses_dash_variants() {
        assert_eq!(
            normalize_key("Technical Capacity – Award  Management"),
            "TECHNICAL CAPACITY AWARD MANAGEMENT"
        );
        assert_eq!(normalize_key("DRUG-FREE WORKPLACE ACT"), "DRUG FREE WORKPLACE ACT");
        assert_eq!(normalize_key("  legal "), "LEGAL");
    }

    #[test]
    fn label_prefix_extraction() {
        assert_eq!(label_prefix("LEGAL : L2"), Some("LEGAL"));
        assert_eq!(
            label_prefix("SECTION 5307 PROGRAM REQUIREMENTS : 5307:1-A"),
            Some("SECTION 5307 PROGRAM REQUIREMENTS")
        );
        assert_eq!(label_prefix("no delimiter"), None);
        assert_eq!(label_prefix(" : L2"), None);
    }

    #[test]
    fn maps_known_labels() {
        let catalog = AreaCatalog::fy26();
        let cases = [
            ("LEGAL : L2", "Legal"),
            ("FINANCIAL MANAGEMENT : F4", "Financial Management and Capacity"),
            (
                "TECHNICAL CAPACITY – AWARD MANAGEMENT : TC-AM5",
                "Technical Capacity - Award Management",
            ),
            (
                "TECHNICAL CAPACITY - AWARD MANAGEMENT : TC-AM5",
                "Technical Capacity - Award Management",
            ),
            ("PROCUREMENT : P12", "Procurement"),
            ("DRUG FREE WORKPLACE ACT : DFWA1", "Drug-Free Workplace Act"),
            ("DRUG-FREE WORKPLACE ACT : DFWA1", "Drug-Free Workplace Act"),
            (
                "SECTION 5307 PROGRAM REQUIREMENTS : 5307:1-A",
                "Section 5307 Program Requirements",
            ),
            ("PTASP : PTASP1", "Public Transportation Agency Safety Plan (PTASP)"),
        ];
        for (label, expected) in cases {
            assert_eq!(catalog.area_for_label(label), Some(expected), "label {label}");
        }
    }

    #[test]
    fn unknown_labels_do_not_map() {
        let catalog = AreaCatalog::fy26();
        assert_eq!(catalog.area_for_label("BUY AMERICA : BA1"), None);
        assert_eq!(catalog.area_for_label("LEGAL"), None);
        assert_eq!(catalog.area_for_label(""), None);
    }

    #[test]
    fn loads_from_toml() {
        let toml = r#"
version = "test-3"
areas = ["Legal", "Procurement", "Title VI"]

[prefixes]
"LEGAL" = "Legal"
"procurement" = "Procurement"
"#;
        let catalog = AreaCatalog::from_toml_str(toml).unwrap();
        assert_eq!(catalog.version(), "test-3");
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.area_for_label("Procurement : P1"), Some("Procurement"));
        assert_eq!(catalog.position("Title VI"), Some(2));
    }

    #[test]
    fn rejects_unknown_target_and_duplicates() {
        let err = AreaCatalog::new("bad", vec!["Legal".into()], [("LEGAL", "Legal Stuff")])
            .unwrap_err();
        assert!(err.to_string().contains("unknown area"));

        let err = AreaCatalog::new(
            "dup",
            vec!["Legal".into(), "Legal".into()],
            std::iter::empty::<(&str, &str)>(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("twice"));

        let err = AreaCatalog::from_toml_str("version = \"x\"\nareas = []").unwrap_err();
        assert!(err.to_string().contains("no review areas"));
    }

    #[test]
    fn from_config_defaults_to_builtin() {
        let catalog = AreaCatalog::from_config(&CatalogSection::default()).unwrap();
        assert_eq!(catalog, AreaCatalog::fy26());
    }
}
