//! Parsed conditions snapshot types
//!
//! Everything here is an immutable value produced once per successful parse.

use crate::domain::normalize;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Raw conditions page as fetched. Owned by the fetch step and consumed by the parser.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawDocument {
    pub fn new(body: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        Self { body: body.into(), fetched_at }
    }
}

/// A parsed scalar that may be absent upstream or fail validation.
///
/// Out-of-range input is kept as `Malformed` with the raw text, never clamped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Field<T> {
    Value(T),
    Missing,
    Malformed { raw: String },
}

impl<T> Field<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Field::Missing)
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Field::Malformed { .. })
    }
}

impl<T: Copy> Field<T> {
    pub fn get(&self) -> Option<T> {
        self.value().copied()
    }
}

/// Snow accumulations (cm) and surface conditions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnowMetrics {
    pub snow_24h: Field<f64>,
    pub snow_48h: Field<f64>,
    pub snow_7d: Field<f64>,
    pub snow_total: Field<f64>,
    pub surface: Option<String>,
    pub base: Option<String>,
    pub coverage_pct: Field<f64>,
}

impl Default for SnowMetrics {
    fn default() -> Self {
        Self {
            snow_24h: Field::Missing,
            snow_48h: Field::Missing,
            snow_7d: Field::Missing,
            snow_total: Field::Missing,
            surface: None,
            base: None,
            coverage_pct: Field::Missing,
        }
    }
}

/// Operational category reported in the recap blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Lifts,
    Trails,
    Glades,
    Parks,
    Hiking,
    Snowshoe,
    Parking,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Lifts,
        Category::Trails,
        Category::Glades,
        Category::Parks,
        Category::Hiking,
        Category::Snowshoe,
        Category::Parking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Lifts => "lifts",
            Category::Trails => "trails",
            Category::Glades => "glades",
            Category::Parks => "parks",
            Category::Hiking => "hiking",
            Category::Snowshoe => "snowshoe",
            Category::Parking => "parking",
        }
    }

    /// Upper bound on a plausible total for the category. Used for validation only.
    pub fn max_total(&self) -> u32 {
        match self {
            Category::Lifts => 20,
            Category::Trails => 200,
            Category::Glades => 100,
            Category::Parks => 20,
            Category::Hiking => 50,
            Category::Snowshoe => 50,
            Category::Parking => 40,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "open / total" pair from a recap block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub open: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountPair {
    pub day: Field<Availability>,
    pub night: Field<Availability>,
}

impl CountPair {
    pub fn missing() -> Self {
        Self { day: Field::Missing, night: Field::Missing }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationalCounts {
    pub lifts: CountPair,
    pub trails: CountPair,
    pub glades: CountPair,
    pub parks: CountPair,
    pub hiking: CountPair,
    pub snowshoe: CountPair,
    pub parking: CountPair,
}

impl Default for OperationalCounts {
    fn default() -> Self {
        Self {
            lifts: CountPair::missing(),
            trails: CountPair::missing(),
            glades: CountPair::missing(),
            parks: CountPair::missing(),
            hiking: CountPair::missing(),
            snowshoe: CountPair::missing(),
            parking: CountPair::missing(),
        }
    }
}

impl OperationalCounts {
    pub fn get(&self, category: Category) -> &CountPair {
        match category {
            Category::Lifts => &self.lifts,
            Category::Trails => &self.trails,
            Category::Glades => &self.glades,
            Category::Parks => &self.parks,
            Category::Hiking => &self.hiking,
            Category::Snowshoe => &self.snowshoe,
            Category::Parking => &self.parking,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut CountPair {
        match category {
            Category::Lifts => &mut self.lifts,
            Category::Trails => &mut self.trails,
            Category::Glades => &mut self.glades,
            Category::Parks => &mut self.parks,
            Category::Hiking => &mut self.hiking,
            Category::Snowshoe => &mut self.snowshoe,
            Category::Parking => &mut self.parking,
        }
    }
}

/// The seven mountain sectors ("versants"). Fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectorId {
    Village,
    Lac,
    Cantons,
    Epinettes,
    MontSoleil,
    Midi,
    CoteOuest,
}

impl SectorId {
    pub const ALL: [SectorId; 7] = [
        SectorId::Village,
        SectorId::Lac,
        SectorId::Cantons,
        SectorId::Epinettes,
        SectorId::MontSoleil,
        SectorId::Midi,
        SectorId::CoteOuest,
    ];

    /// Display name as the resort writes it
    pub fn display_name(&self) -> &'static str {
        match self {
            SectorId::Village => "Versant du Village",
            SectorId::Lac => "Versant du Lac",
            SectorId::Cantons => "Versant des Cantons",
            SectorId::Epinettes => "Versant des Épinettes",
            SectorId::MontSoleil => "Mont Soleil",
            SectorId::Midi => "Versant du Midi",
            SectorId::CoteOuest => "Versant de la Côte Ouest",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SectorId::Village => "village",
            SectorId::Lac => "lac",
            SectorId::Cantons => "cantons",
            SectorId::Epinettes => "epinettes",
            SectorId::MontSoleil => "mont_soleil",
            SectorId::Midi => "midi",
            SectorId::CoteOuest => "cote_ouest",
        }
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerrainSector {
    pub sector: SectorId,
    pub open_pct: Field<f64>,
}

/// Difficulty rating decoded from the `ico-*` legend icon
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Intermediate,
    Difficult,
    VeryDifficult,
    Extreme,
    Other(String),
    Unknown,
}

impl Difficulty {
    /// Decode the icon class suffix (`vert`, `bleu`, `noir`, `double-noir`, ...)
    pub fn from_icon(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "" => Difficulty::Unknown,
            "vert" | "green" | "facile" => Difficulty::Easy,
            "bleu" | "blue" | "intermediaire" => Difficulty::Intermediate,
            "noir" | "black" | "difficile" => Difficulty::Difficult,
            "double-noir" | "doublenoir" | "double-black" | "double_noir" => {
                Difficulty::VeryDifficult
            }
            "triple-noir" | "triplenoir" | "triple-black" | "extreme" => Difficulty::Extreme,
            other => Difficulty::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Difficult => "difficult",
            Difficulty::VeryDifficult => "very_difficult",
            Difficulty::Extreme => "extreme",
            Difficulty::Other(s) => s,
            Difficulty::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailKind {
    Trail,
    Glade,
}

/// Identity key used to line up trails across cycles and against the map dataset.
///
/// Normalized name first, trail number as tiebreak: `"cowansville#47"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TrailKey(String);

impl TrailKey {
    pub fn new(name: &str, number: Option<&str>) -> Self {
        let normalized = normalize::normalize_name(normalize::strip_area_suffix(name));
        Self(format!("{}#{}", normalized, number.map(str::trim).unwrap_or_default()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailRecord {
    /// Resort-assigned number; not unique across reissues
    pub number: Option<String>,
    pub name: String,
    /// Area heading the row was listed under, verbatim
    pub area: Option<String>,
    pub sector: Option<SectorId>,
    pub kind: TrailKind,
    pub difficulty: Difficulty,
    pub day_open: bool,
    pub night_open: bool,
}

impl TrailRecord {
    pub fn key(&self) -> TrailKey {
        TrailKey::new(&self.name, self.number.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiftRecord {
    pub name: String,
    pub area: Option<String>,
    pub sector: Option<SectorId>,
    pub day_open: bool,
    pub night_open: bool,
    /// Live status text when the page provides one
    pub realtime: Option<String>,
}

/// A detail row from the snow park, alpine hiking, snowshoe or parking block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilityRecord {
    pub category: Category,
    pub number: Option<String>,
    pub name: String,
    pub area: Option<String>,
    pub difficulty: Difficulty,
    pub day_open: bool,
    pub night_open: bool,
    /// Where a snow park sits, with the "Emplacement:" prefix removed
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResortStatus {
    Open,
    Closed,
}

/// Non-fatal issue found while parsing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    UnknownSector { label: String },
    MissingSection { section: String },
    MalformedField { field: String, raw: String },
    MalformedRow { section: String, index: usize, reason: String },
    CountExceedsMax { category: Category, total: u32, max: u32 },
    OpenExceedsTotal { category: Category, open: u32, total: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParseDiagnostics {
    pub warnings: Vec<ParseWarning>,
    pub rows_skipped: usize,
}

/// One immutable reading of mountain conditions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionsSnapshot {
    pub status: ResortStatus,
    pub hours_text: String,
    pub date_label: Option<String>,
    pub updated_label: Option<String>,
    pub snow: SnowMetrics,
    pub counts: OperationalCounts,
    /// Always the seven sectors in `SectorId::ALL` order
    pub terrain: Vec<TerrainSector>,
    pub trails: Vec<TrailRecord>,
    pub lifts: Vec<LiftRecord>,
    /// Snow parks, alpine hiking, snowshoe trails and parking lots, in page order
    pub facilities: Vec<FacilityRecord>,
    pub diagnostics: ParseDiagnostics,
    pub fetched_at: DateTime<Utc>,
}

impl ConditionsSnapshot {
    pub fn sector(&self, id: SectorId) -> Option<&TerrainSector> {
        self.terrain.iter().find(|s| s.sector == id)
    }

    pub fn facilities_in(&self, category: Category) -> impl Iterator<Item = &FacilityRecord> {
        self.facilities.iter().filter(move |f| f.category == category)
    }
}
