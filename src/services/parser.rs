//! Conditions page parser
//!
//! Turns the raw conditions page into a `ConditionsSnapshot`. The upstream
//! markup is unversioned, so every region is located by its id landmark first
//! and by its heading label second. The parser is strict on the headline
//! sections (status banner, snow block, lift and trail counts) and lenient on
//! everything else: row and field problems are recorded in the diagnostics
//! and parsing continues.

use crate::domain::conditions::{
    Availability, Category, ConditionsSnapshot, CountPair, Difficulty, FacilityRecord, Field, LiftRecord,
    OperationalCounts, ParseDiagnostics, ParseWarning, RawDocument, ResortStatus, SectorId,
    SnowMetrics, TerrainSector, TrailKind, TrailRecord,
};
use crate::domain::normalize::{self, canonical_sector};
use rustc_hash::FxHashMap;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

const BANNER_SECTION: &str = "status_banner";
const UPDATE_PREFIX: &str = "Mise à jour le";
const LOCATION_PREFIX: &str = "Emplacement:";
/// Blocks whose detail rows become `FacilityRecord`s
const FACILITY_CATEGORIES: [Category; 4] = [Category::Parks, Category::Hiking, Category::Snowshoe, Category::Parking];
const PLACEHOLDERS: [&str; 9] = ["", "-", "--", "–", "—", "n/d", "nd", "n/a", "s/o"];

/// Section-level failure. Fatal to the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("document is empty")]
    EmptyDocument,
    #[error("required section `{section}` not found")]
    MissingSection { section: &'static str },
    #[error("required section `{section}` is malformed: {reason}")]
    MalformedSection { section: &'static str, reason: String },
}

/// Whatever was readable before a required section failed
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSnapshot {
    pub hours_text: Option<String>,
    pub snow: Option<SnowMetrics>,
    pub counts: OperationalCounts,
    pub diagnostics: ParseDiagnostics,
}

#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct ParseError {
    pub reason: ParseFailure,
    pub partial: Option<Box<PartialSnapshot>>,
}

impl ParseError {
    fn new(reason: ParseFailure, partial: Option<PartialSnapshot>) -> Self {
        Self { reason, partial: partial.map(Box::new) }
    }
}

struct Selectors {
    with_id: Selector,
    headings: Selector,
    banner: Selector,
    banner_fallback: Selector,
    date: Selector,
    updated: Selector,
    data_metric: Selector,
    list_item: Selector,
    data_label: Selector,
    paragraph: Selector,
    progress_block: Selector,
    progress_title: Selector,
    progress_value: Selector,
    resume_state: Selector,
    state_open: Selector,
    state_total: Selector,
    area_block: Selector,
    area_title: Selector,
    row: Selector,
    detail_row: Selector,
    number: Selector,
    name: Selector,
    legend_icon: Selector,
    day: Selector,
    night: Selector,
    realtime: Selector,
    location: Selector,
}

fn selector(css: &str) -> Selector {
    // Constant selectors only; every one is exercised by the tests below
    Selector::parse(css).expect("built-in selector")
}

static SEL: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    with_id: selector("[id]"),
    headings: selector("h2, h3, h4, .titre-bloc, .dash-title"),
    banner: selector(".dash-horaire .heures"),
    banner_fallback: selector(".heures"),
    date: selector("h1.date_encours"),
    updated: selector(".maj-time"),
    data_metric: selector(".data_metric"),
    list_item: selector("li"),
    data_label: selector("span.txt-data-label"),
    paragraph: selector("p"),
    progress_block: selector(".progress-block"),
    progress_title: selector(".title-data-big"),
    progress_value: selector(".txt-data-big"),
    resume_state: selector(".dash-resume .etat"),
    state_open: selector(".txt-data"),
    state_total: selector(".total"),
    area_block: selector(".dash-detail .bloc_versant"),
    area_title: selector("span.titre"),
    row: selector(".liste"),
    detail_row: selector(".dash-detail .liste"),
    number: selector(".numero"),
    name: selector(".nom"),
    legend_icon: selector(".legende i"),
    day: selector(".jour"),
    night: selector(".soir"),
    realtime: selector(".statut"),
    location: selector(".emplacement"),
});

/// Child element whose presence confirms a label-located block is the right one
#[derive(Debug, Clone, Copy)]
enum Marker {
    Metric,
    Label,
    Progress,
    Summary,
}

impl Selectors {
    fn marker(&self, marker: Marker) -> &Selector {
        match marker {
            Marker::Metric => &self.data_metric,
            Marker::Label => &self.data_label,
            Marker::Progress => &self.progress_block,
            Marker::Summary => &self.resume_state,
        }
    }
}

struct SectionLocator {
    name: &'static str,
    id: &'static str,
    /// Normalized heading texts that identify the block
    labels: &'static [&'static str],
    marker: Marker,
}

const SNOW: SectionLocator = SectionLocator {
    name: "snow_metrics",
    id: "dash-acc",
    labels: &["accumulations", "accumulation", "neige recente"],
    marker: Marker::Metric,
};

const CONDITIONS: SectionLocator = SectionLocator {
    name: "conditions",
    id: "dash-conditions",
    labels: &["conditions", "conditions de neige"],
    marker: Marker::Label,
};

const TERRAIN: SectionLocator = SectionLocator {
    name: "terrain",
    id: "dash-terrains",
    labels: &["terrains", "terrain", "terrain ouvert"],
    marker: Marker::Progress,
};

fn recap_locator(category: Category) -> SectionLocator {
    let (id, labels): (&'static str, &'static [&'static str]) = match category {
        Category::Lifts => ("recap-remontes", &["remontees", "remontees mecaniques", "lifts"]),
        Category::Trails => ("recap-pistes", &["pistes", "trails"]),
        Category::Glades => ("recap-pistes-ssbois", &["sous bois", "glades"]),
        Category::Parks => ("recap-snowparks", &["snowparks", "parcs a neige", "parcs"]),
        Category::Hiking => ("recap-alpine", &["randonnee alpine", "ski de randonnee"]),
        Category::Snowshoe => ("recap-raquette", &["raquette", "raquettes"]),
        Category::Parking => ("recap-stationnement", &["stationnement", "stationnements", "parking"]),
    };
    SectionLocator { name: category.as_str(), id, labels, marker: Marker::Summary }
}

/// Categories whose counts are required for a usable snapshot
const REQUIRED_COUNTS: [Category; 2] = [Category::Lifts, Category::Trails];

#[derive(Debug, Default)]
pub struct PageParser;

impl PageParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, raw: RawDocument) -> Result<ConditionsSnapshot, ParseError> {
        if raw.body.trim().is_empty() {
            return Err(ParseError::new(ParseFailure::EmptyDocument, None));
        }

        let doc = Html::parse_document(&raw.body);
        let mut diagnostics = ParseDiagnostics::default();
        let mut sectors = SectorResolver::default();

        let banner = status_banner(&doc);
        let snow = match locate(&doc, &SNOW) {
            Some(block) => snow_metrics(block, &mut diagnostics.warnings),
            None => Err(ParseFailure::MissingSection { section: SNOW.name }),
        };

        let mut counts = OperationalCounts::default();
        let mut blocks: FxHashMap<Category, ElementRef<'_>> = FxHashMap::default();
        let mut counts_failure = None;
        for category in Category::ALL {
            let loc = recap_locator(category);
            let required = REQUIRED_COUNTS.contains(&category);
            let Some(block) = locate(&doc, &loc) else {
                if required {
                    counts_failure.get_or_insert(ParseFailure::MissingSection { section: loc.name });
                } else {
                    diagnostics
                        .warnings
                        .push(ParseWarning::MissingSection { section: loc.name.to_string() });
                }
                continue;
            };
            match summary_counts(block, category, &mut diagnostics.warnings) {
                Some(pair) => *counts.get_mut(category) = pair,
                None if required => {
                    counts_failure.get_or_insert(ParseFailure::MalformedSection {
                        section: loc.name,
                        reason: "no summary counts".to_string(),
                    });
                }
                None => diagnostics
                    .warnings
                    .push(ParseWarning::MalformedField { field: loc.name.to_string(), raw: String::new() }),
            }
            blocks.insert(category, block);
        }

        let (hours_text, mut snow) = match (banner, snow, counts_failure) {
            (Ok(hours), Ok(snow), None) => (hours, snow),
            (Err(reason), snow, _) => return Err(failed(reason, None, snow.ok(), counts, diagnostics)),
            (Ok(hours), Err(reason), _) => {
                return Err(failed(reason, Some(hours), None, counts, diagnostics));
            }
            (Ok(hours), Ok(snow), Some(reason)) => {
                return Err(failed(reason, Some(hours), Some(snow), counts, diagnostics));
            }
        };

        match locate(&doc, &CONDITIONS) {
            Some(block) => surface_conditions(block, &mut snow, &mut diagnostics.warnings),
            None => diagnostics
                .warnings
                .push(ParseWarning::MissingSection { section: CONDITIONS.name.to_string() }),
        }

        let terrain_block = locate(&doc, &TERRAIN);
        if terrain_block.is_none() {
            diagnostics.warnings.push(ParseWarning::MissingSection { section: TERRAIN.name.to_string() });
        }
        let terrain = terrain_sectors(terrain_block, &mut sectors, &mut diagnostics.warnings);

        let mut trails = Vec::new();
        for (category, kind) in [(Category::Trails, TrailKind::Trail), (Category::Glades, TrailKind::Glade)] {
            if let Some(block) = blocks.get(&category) {
                trails.extend(trail_rows(*block, category, kind, &mut sectors, &mut diagnostics));
            }
        }
        let lifts = blocks
            .get(&Category::Lifts)
            .map(|block| lift_rows(*block, &mut sectors, &mut diagnostics))
            .unwrap_or_default();
        let mut facilities = Vec::new();
        for category in FACILITY_CATEGORIES {
            if let Some(block) = blocks.get(&category) {
                facilities.extend(facility_rows(*block, category, &mut diagnostics));
            }
        }

        diagnostics.warnings.extend(sectors.into_warnings());

        let status = if normalize::banner_is_closed(&hours_text) {
            ResortStatus::Closed
        } else {
            ResortStatus::Open
        };

        debug!(
            trails = trails.len(),
            lifts = lifts.len(),
            facilities = facilities.len(),
            warnings = diagnostics.warnings.len(),
            rows_skipped = diagnostics.rows_skipped,
            "page_parsed"
        );

        Ok(ConditionsSnapshot {
            status,
            hours_text,
            date_label: first_text(doc.root_element(), &SEL.date),
            updated_label: first_text(doc.root_element(), &SEL.updated)
                .map(|t| t.replace(UPDATE_PREFIX, "").trim().to_string()),
            snow,
            counts,
            terrain,
            trails,
            lifts,
            facilities,
            diagnostics,
            fetched_at: raw.fetched_at,
        })
    }
}

#[cold]
fn failed(
    reason: ParseFailure,
    hours_text: Option<String>,
    snow: Option<SnowMetrics>,
    counts: OperationalCounts,
    diagnostics: ParseDiagnostics,
) -> ParseError {
    ParseError::new(reason, Some(PartialSnapshot { hours_text, snow, counts, diagnostics }))
}

/// Element text with whitespace collapsed
fn text_of(el: ElementRef<'_>) -> String {
    el.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Text of the first matching descendant, `None` when absent or blank
fn first_text(el: ElementRef<'_>, sel: &Selector) -> Option<String> {
    el.select(sel).next().map(text_of).filter(|t| !t.is_empty())
}

fn locate<'a>(doc: &'a Html, loc: &SectionLocator) -> Option<ElementRef<'a>> {
    if let Some(el) = doc.select(&SEL.with_id).find(|el| el.value().id() == Some(loc.id)) {
        return Some(el);
    }

    let marker = SEL.marker(loc.marker);
    let found = doc
        .select(&SEL.headings)
        .filter(|h| loc.labels.contains(&normalize::normalize_name(&text_of(*h)).as_str()))
        .find_map(|h| {
            h.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|a| a.select(marker).next().is_some())
        });
    if found.is_some() {
        debug!(section = loc.name, "section_located_by_label");
    }
    found
}

fn status_banner(doc: &Html) -> Result<String, ParseFailure> {
    let el = doc
        .select(&SEL.banner)
        .next()
        .or_else(|| doc.select(&SEL.banner_fallback).next())
        .ok_or(ParseFailure::MissingSection { section: BANNER_SECTION })?;
    let text = text_of(el);
    if text.is_empty() {
        return Err(ParseFailure::MalformedSection {
            section: BANNER_SECTION,
            reason: "banner is empty".to_string(),
        });
    }
    Ok(text)
}

/// Result of scanning a text cell for its leading number
#[derive(Debug, Clone, Copy, PartialEq)]
enum Extracted {
    Placeholder,
    Number(f64),
    Unreadable,
}

fn is_placeholder(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    PLACEHOLDERS.contains(&lowered.as_str())
}

/// ASCII hyphen, minus sign and en dash
const DASHES: [char; 3] = ['-', '\u{2212}', '\u{2013}'];

/// First number in the text. Accepts `,` or `.` as decimal separator and
/// ignores unit suffixes (`"12,5 cm"` → 12.5). A dash before the number, even
/// spaced, makes it negative; a dash followed by another number is a range
/// and unreadable.
fn extract_number(text: &str) -> Extracted {
    let trimmed = text.trim();
    if is_placeholder(trimmed) {
        return Extracted::Placeholder;
    }
    let Some(start) = trimmed.find(|c: char| c.is_ascii_digit()) else {
        return Extracted::Unreadable;
    };
    let negative = trimmed[..start].trim_end().ends_with(DASHES);
    let rest = &trimmed[start..];
    let mut end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let tail = &rest[end..];
    if tail.starts_with([',', '.']) {
        let frac = &tail[1..];
        let frac_len = frac.find(|c: char| !c.is_ascii_digit()).unwrap_or(frac.len());
        if frac_len > 0 {
            end += 1 + frac_len;
        }
    }
    if is_range_tail(&rest[end..]) {
        return Extracted::Unreadable;
    }
    match rest[..end].replace(',', ".").parse::<f64>() {
        Ok(v) if negative => Extracted::Number(-v),
        Ok(v) => Extracted::Number(v),
        Err(_) => Extracted::Unreadable,
    }
}

/// `"-15 cm"` or `" à 15"` after the first number: a span, not one value
fn is_range_tail(tail: &str) -> bool {
    let tail = tail.trim_start();
    let after = if let Some(rest) = tail.strip_prefix(DASHES) {
        rest
    } else if let Some(rest) = tail.strip_prefix("à ") {
        rest
    } else {
        return false;
    };
    after.trim_start().starts_with(|c: char| c.is_ascii_digit())
}

/// Non-negative measurement with an optional upper bound. Out-of-range input
/// is kept as malformed, never clamped.
fn measure(field: &str, text: &str, max: Option<f64>, warnings: &mut Vec<ParseWarning>) -> Field<f64> {
    match extract_number(text) {
        Extracted::Placeholder => Field::Missing,
        Extracted::Number(v) if v >= 0.0 && !max.is_some_and(|m| v > m) => Field::Value(v),
        Extracted::Number(_) | Extracted::Unreadable => {
            warnings.push(ParseWarning::MalformedField { field: field.to_string(), raw: text.trim().to_string() });
            Field::Malformed { raw: text.trim().to_string() }
        }
    }
}

/// Whole, non-negative count
fn whole(text: &str) -> Field<u32> {
    match extract_number(text) {
        Extracted::Placeholder => Field::Missing,
        Extracted::Number(v) if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 => Field::Value(v as u32),
        _ => Field::Malformed { raw: text.trim().to_string() },
    }
}

fn within_list_item(el: ElementRef<'_>, block: ElementRef<'_>) -> bool {
    el.ancestors()
        .take_while(|n| n.id() != block.id())
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "li")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Day,
    TwoDays,
    Week,
    Season,
}

fn accumulation_period(label: &str) -> Option<Period> {
    let compact: String = normalize::normalize_name(label).split_whitespace().collect();
    if compact.contains("48h") || compact.contains("48heures") {
        Some(Period::TwoDays)
    } else if compact.contains("24h") || compact.contains("24heures") {
        Some(Period::Day)
    } else if compact.contains("7j") || compact.contains("7day") || compact.contains("semaine") {
        Some(Period::Week)
    } else if compact.contains("total") || compact.contains("saison") || compact.contains("cumul") {
        Some(Period::Season)
    } else {
        None
    }
}

fn snow_metrics(block: ElementRef<'_>, warnings: &mut Vec<ParseWarning>) -> Result<SnowMetrics, ParseFailure> {
    let headline = block
        .select(&SEL.data_metric)
        .find(|m| !within_list_item(*m, block))
        .ok_or_else(|| ParseFailure::MalformedSection {
            section: SNOW.name,
            reason: "no headline accumulation".to_string(),
        })?;

    let mut snow = SnowMetrics {
        snow_24h: measure("snow_24h", &text_of(headline), None, warnings),
        ..SnowMetrics::default()
    };

    for item in block.select(&SEL.list_item) {
        let (Some(label), Some(metric)) =
            (item.select(&SEL.data_label).next(), item.select(&SEL.data_metric).next())
        else {
            continue;
        };
        let label = text_of(label);
        let (field, slot) = match accumulation_period(&label) {
            Some(Period::Day) => ("snow_24h", &mut snow.snow_24h),
            Some(Period::TwoDays) => ("snow_48h", &mut snow.snow_48h),
            Some(Period::Week) => ("snow_7d", &mut snow.snow_7d),
            Some(Period::Season) => ("snow_total", &mut snow.snow_total),
            None => {
                debug!(label = %label, "accumulation_label_unknown");
                continue;
            }
        };
        // The headline figure wins over a repeated 24h list entry
        if field == "snow_24h" && !slot.is_missing() {
            continue;
        }
        *slot = measure(field, &text_of(metric), None, warnings);
    }
    Ok(snow)
}

fn surface_conditions(block: ElementRef<'_>, snow: &mut SnowMetrics, warnings: &mut Vec<ParseWarning>) {
    let labels = block.select(&SEL.data_label).map(text_of);
    let values = block.select(&SEL.paragraph).map(text_of);
    for (label, value) in labels.zip(values) {
        let text = (!is_placeholder(&value)).then(|| value.clone());
        match normalize::normalize_name(&label).as_str() {
            "surface" => snow.surface = text,
            "base" => snow.base = text,
            "couverture" | "coverage" | "couverture neigeuse" => {
                snow.coverage_pct = measure("coverage_pct", &value, Some(100.0), warnings);
            }
            other => debug!(label = %other, "condition_label_unknown"),
        }
    }
}

/// Resolves free-text area labels to sectors, warning once per unknown label
#[derive(Default)]
struct SectorResolver {
    seen: FxHashMap<String, Option<SectorId>>,
    unknown: Vec<String>,
}

impl SectorResolver {
    fn resolve(&mut self, label: &str) -> Option<SectorId> {
        if let Some(known) = self.seen.get(label) {
            return *known;
        }
        let resolved = canonical_sector(label).map(|m| m.sector);
        if resolved.is_none() {
            self.unknown.push(label.to_string());
        }
        self.seen.insert(label.to_string(), resolved);
        resolved
    }

    fn into_warnings(self) -> impl Iterator<Item = ParseWarning> {
        self.unknown.into_iter().map(|label| ParseWarning::UnknownSector { label })
    }
}

fn terrain_sectors(
    block: Option<ElementRef<'_>>,
    sectors: &mut SectorResolver,
    warnings: &mut Vec<ParseWarning>,
) -> Vec<TerrainSector> {
    let mut values: [Option<Field<f64>>; 7] = Default::default();
    for progress in block.into_iter().flat_map(|b| b.select(&SEL.progress_block)) {
        let (Some(title), Some(value)) =
            (first_text(progress, &SEL.progress_title), progress.select(&SEL.progress_value).next())
        else {
            continue;
        };
        let Some(sector) = sectors.resolve(&title) else {
            continue;
        };
        let Some(index) = SectorId::ALL.iter().position(|s| *s == sector) else {
            continue;
        };
        // First reading of a sector wins
        if values[index].is_none() {
            let field = format!("terrain_{}", sector.as_str());
            values[index] = Some(measure(&field, &text_of(value), Some(100.0), warnings));
        }
    }

    SectorId::ALL
        .iter()
        .zip(values)
        .map(|(sector, open_pct)| TerrainSector { sector: *sector, open_pct: open_pct.unwrap_or(Field::Missing) })
        .collect()
}

fn availability(state: ElementRef<'_>, category: Category, warnings: &mut Vec<ParseWarning>) -> Field<Availability> {
    let (Some(open_text), Some(total_text)) =
        (first_text(state, &SEL.state_open), first_text(state, &SEL.state_total))
    else {
        return Field::Missing;
    };
    let total_text = total_text.replace('/', "");
    match (whole(&open_text), whole(&total_text)) {
        (Field::Value(open), Field::Value(total)) => {
            if total > category.max_total() {
                warnings.push(ParseWarning::CountExceedsMax { category, total, max: category.max_total() });
            }
            if open > total {
                warnings.push(ParseWarning::OpenExceedsTotal { category, open, total });
            }
            Field::Value(Availability { open, total })
        }
        (Field::Missing, _) | (_, Field::Missing) => Field::Missing,
        _ => {
            let raw = format!("{}/{}", open_text, total_text.trim());
            warnings.push(ParseWarning::MalformedField { field: format!("{}_count", category), raw: raw.clone() });
            Field::Malformed { raw }
        }
    }
}

/// Day and night counts from the block summary; `None` when it has no summary
fn summary_counts(block: ElementRef<'_>, category: Category, warnings: &mut Vec<ParseWarning>) -> Option<CountPair> {
    let mut states = block.select(&SEL.resume_state);
    let day = states.next()?;
    let night = states.next();
    Some(CountPair {
        day: availability(day, category, warnings),
        night: night.map_or(Field::Missing, |n| availability(n, category, warnings)),
    })
}

/// Detail rows with the area heading they were listed under
fn detail_rows<'a>(block: ElementRef<'a>) -> Vec<(Option<String>, ElementRef<'a>)> {
    let areas: Vec<ElementRef<'a>> = block.select(&SEL.area_block).collect();
    if areas.is_empty() {
        return block.select(&SEL.detail_row).map(|row| (None, row)).collect();
    }
    areas
        .into_iter()
        .flat_map(|area| {
            let title = first_text(area, &SEL.area_title);
            area.select(&SEL.row).map(move |row| (title.clone(), row))
        })
        .collect()
}

fn difficulty(row: ElementRef<'_>) -> Difficulty {
    row.select(&SEL.legend_icon)
        .next()
        .and_then(|icon| icon.value().classes().find_map(|c| c.strip_prefix("ico-")).map(Difficulty::from_icon))
        .unwrap_or(Difficulty::Unknown)
}

fn is_open(row: ElementRef<'_>, sel: &Selector) -> bool {
    first_text(row, sel).is_some_and(|t| normalize::status_is_open(&t))
}

fn skip_row(diagnostics: &mut ParseDiagnostics, section: Category, index: usize, reason: &str) {
    diagnostics.rows_skipped += 1;
    diagnostics.warnings.push(ParseWarning::MalformedRow {
        section: section.as_str().to_string(),
        index,
        reason: reason.to_string(),
    });
}

fn trail_rows(
    block: ElementRef<'_>,
    category: Category,
    kind: TrailKind,
    sectors: &mut SectorResolver,
    diagnostics: &mut ParseDiagnostics,
) -> Vec<TrailRecord> {
    let mut trails = Vec::new();
    for (index, (area, row)) in detail_rows(block).into_iter().enumerate() {
        let Some(name) = first_text(row, &SEL.name) else {
            skip_row(diagnostics, category, index, "row has no name");
            continue;
        };
        let sector = area.as_deref().and_then(|a| sectors.resolve(a));
        trails.push(TrailRecord {
            number: first_text(row, &SEL.number),
            name,
            area,
            sector,
            kind,
            difficulty: difficulty(row),
            day_open: is_open(row, &SEL.day),
            night_open: is_open(row, &SEL.night),
        });
    }
    trails
}

fn lift_rows(block: ElementRef<'_>, sectors: &mut SectorResolver, diagnostics: &mut ParseDiagnostics) -> Vec<LiftRecord> {
    let mut lifts = Vec::new();
    for (index, (area, row)) in detail_rows(block).into_iter().enumerate() {
        let Some(name) = first_text(row, &SEL.name) else {
            skip_row(diagnostics, Category::Lifts, index, "row has no name");
            continue;
        };
        let sector = area.as_deref().and_then(|a| sectors.resolve(a));
        lifts.push(LiftRecord {
            name,
            area,
            sector,
            day_open: is_open(row, &SEL.day),
            night_open: is_open(row, &SEL.night),
            realtime: first_text(row, &SEL.realtime),
        });
    }
    lifts
}

/// Park, hiking, snowshoe and parking rows. Their area headings are not
/// terrain sectors, so they are kept as text only.
fn facility_rows(block: ElementRef<'_>, category: Category, diagnostics: &mut ParseDiagnostics) -> Vec<FacilityRecord> {
    let mut facilities = Vec::new();
    for (index, (area, row)) in detail_rows(block).into_iter().enumerate() {
        let Some(name) = first_text(row, &SEL.name) else {
            skip_row(diagnostics, category, index, "row has no name");
            continue;
        };
        let location = first_text(row, &SEL.location)
            .map(|t| t.replace(LOCATION_PREFIX, "").trim().to_string())
            .filter(|t| !t.is_empty());
        facilities.push(FacilityRecord {
            category,
            number: first_text(row, &SEL.number),
            name,
            area,
            difficulty: difficulty(row),
            day_open: is_open(row, &SEL.day),
            night_open: is_open(row, &SEL.night),
            location,
        });
    }
    facilities
}
