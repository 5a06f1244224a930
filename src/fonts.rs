//! Font family name heuristics
//!
//! Font Book shows family names ("Zed Plex Sans") while `~/Library/Fonts`
//! holds files named after PostScript names ("ZedPlexSans-Regular.ttf").
//! These helpers map between the two well enough for choosing what to sync.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

pub const FONT_EXTENSIONS: [&str; 6] = ["ttf", "otf", "ttc", "woff", "woff2", "dfont"];

const STYLE_SUFFIXES: [&str; 19] = [
    "-BoldItalic",
    "-LightItalic",
    "-MediumItalic",
    "-ThinItalic",
    "-BoldOblique",
    "-ExtraLight",
    "-ExtraBold",
    "-SemiBold",
    "-Regular",
    "-Oblique",
    "-Italic",
    "-Medium",
    "-Light",
    "-Black",
    "-Heavy",
    "-Bold",
    "-Thin",
    "Regular",
    "Italic",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFamily {
    pub name: String,
    pub files: Vec<String>,
}

fn list_files(fonts_dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = std::fs::read_dir(fonts_dir)
        .with_context(|| format!("Failed to read fonts directory {}", fonts_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub fn is_font_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            FONT_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// File names in `fonts_dir` that belong to `family`.
///
/// Matches case-insensitively on the family name as typed, without spaces,
/// and with spaces replaced by dashes or underscores.
pub fn font_files_for_family(fonts_dir: &Path, family: &str) -> Result<Vec<String>> {
    let family = family.trim().to_lowercase();
    if family.is_empty() {
        return Ok(Vec::new());
    }

    let needles = [
        family.clone(),
        family.replace(' ', ""),
        family.replace(' ', "-"),
        family.replace(' ', "_"),
    ];

    Ok(list_files(fonts_dir)?
        .into_iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            needles.iter().any(|needle| lower.contains(needle.as_str()))
        })
        .collect())
}

/// Best-effort family name for a font file name
pub fn family_name_for_file(file_name: &str) -> Option<String> {
    static CAMEL: OnceLock<Regex> = OnceLock::new();
    let camel = CAMEL.get_or_init(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));

    let stem = Path::new(file_name).file_stem()?.to_string_lossy().to_string();
    let base = STYLE_SUFFIXES
        .iter()
        .find_map(|suffix| stem.strip_suffix(suffix))
        .unwrap_or(&stem);
    let base = base.trim_end_matches(['-', '_', ' ']);

    let spaced = camel.replace_all(base, "$1 $2").replace(['-', '_'], " ");
    let name = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
    (!name.is_empty()).then_some(name)
}

/// Families found in `fonts_dir`, sorted by name
pub fn installed_font_families(fonts_dir: &Path) -> Result<Vec<FontFamily>> {
    let mut families: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for file in list_files(fonts_dir)? {
        if !is_font_file(&file) {
            continue;
        }
        if let Some(family) = family_name_for_file(&file) {
            families.entry(family).or_default().push(file);
        }
    }

    Ok(families
        .into_iter()
        .map(|(name, files)| FontFamily { name, files })
        .collect())
}
