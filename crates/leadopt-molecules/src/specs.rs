//! Pipeline specification: the `Subject,Property,Value[,Description]` CSV
//! resolved into typed per-stage settings with documented defaults.
//!
//! Parsing is pure. Unknown enumerated values, missing required properties and
//! invalid selection criteria are rejected here, before any stage runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use leadopt_common::{LeadOptError, Result};

use crate::expr::ScoreExpr;
use crate::ligand::IdentifierType;

// ── Recognised columns ───────────────────────────────────────────────────────

/// Columns of the DoGSiteScorer result table usable for pocket selection.
pub const POCKET_CRITERIA: &[&str] = &[
    "lig_cov", "poc_cov", "volume", "enclosure", "surface", "depth", "surf/vol",
    "ell c/a", "ell b/a", "siteAtms", "Cs", "Ns", "Os", "Ss", "Xs", "accept", "donor",
    "hydrophobic_interactions", "hydrophobicity", "metal", "negAA", "posAA", "polarAA",
    "apolarAA", "simpleScore", "drugScore",
];

/// Columns of the per-pose results table usable for the final selection.
pub const OPTIMIZED_LIGAND_CRITERIA: &[&str] = &[
    "affinity", "h_bond", "hydrophobic", "salt_bridge", "water_bridge", "pi_stacking",
    "pi_cation", "halogen", "metal", "total_num_interactions", "drug_score_lipinski",
    "drug_score_qed", "drug_score_custom", "drug_score_total",
];

pub const DEFAULT_POCKET_SORTING: &[&str] = &["lig_cov", "poc_cov"];
pub const DEFAULT_POCKET_FUNCTION: &str = "(df[drugScore] + df[simpleScore]) / df[volume]";
pub const DEFAULT_LIGAND_SORTING: &[&str] = &["affinity", "total_num_interactions"];
pub const DEFAULT_LIGAND_FUNCTION: &str =
    "-2*df[affinity] + df[total_num_interactions] * df[drug_score_total]";

fn default_min_similarity_percent() -> u32 { 80 }
fn default_max_num_results() -> u32 { 100 }
fn default_max_num_druglike() -> usize { 30 }
fn default_num_poses() -> u32 { 5 }
fn default_exhaustiveness() -> u32 { 10 }
fn default_random_seed() -> Option<i64> { Some(1111) }
fn default_num_results() -> usize { 1 }

// ── Subjects ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subject {
    Protein,
    Ligand,
    BindingSite,
    LigandSimilaritySearch,
    Docking,
    InteractionAnalysis,
    OptimizedLigand,
}

impl Subject {
    pub const ALL: [Subject; 7] = [
        Subject::Protein,
        Subject::Ligand,
        Subject::BindingSite,
        Subject::LigandSimilaritySearch,
        Subject::Docking,
        Subject::InteractionAnalysis,
        Subject::OptimizedLigand,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Subject::Protein => "Protein",
            Subject::Ligand => "Ligand",
            Subject::BindingSite => "Binding Site",
            Subject::LigandSimilaritySearch => "Ligand Similarity Search",
            Subject::Docking => "Docking",
            Subject::InteractionAnalysis => "Interaction Analysis",
            Subject::OptimizedLigand => "Optimized Ligand",
        }
    }

    /// Recognised properties, as normalised by `normalise_property`.
    fn properties(&self) -> &'static [&'static str] {
        match self {
            Subject::Protein | Subject::Ligand => &["input type", "input value"],
            Subject::BindingSite => &[
                "definition method",
                "coordinates",
                "ligand",
                "detection method",
                "protein chain-id",
                "protein ligand-id",
                "selection method",
                "selection criteria",
            ],
            Subject::LigandSimilaritySearch => &[
                "search engine",
                "minimum similarity [%]",
                "maximum number of results",
                "maximum number of most drug-like analogs to continue with",
            ],
            Subject::Docking => &[
                "program",
                "number of docking poses per ligand",
                "exhaustiveness",
                "random seed",
            ],
            Subject::InteractionAnalysis => &["program"],
            Subject::OptimizedLigand => &[
                "number of results",
                "selection method",
                "selection criteria",
                "tie policy",
            ],
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|s| s.label().to_ascii_lowercase() == wanted)
    }
}

// ── Typed specification ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProteinInputType {
    PdbCode,
    PdbFilepath,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProteinSpec {
    pub input_type: ProteinInputType,
    pub input_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LigandSpec {
    pub input_type: IdentifierType,
    pub input_value: String,
}

/// An axis-aligned search box: center point and edge lengths in Å.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxCoordinates {
    pub center: [f64; 3],
    pub size: [f64; 3],
}

/// How the final row of a ranked table is chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "criteria", rename_all = "snake_case")]
pub enum Selection {
    /// Lexicographic descending sort over the listed columns.
    Sorting(Vec<String>),
    /// Descending sort over a computed score.
    Function(ScoreExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    DogSiteScorer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSpec {
    pub method: DetectionMethod,
    pub protein_chain_id: Option<String>,
    pub protein_ligand_id: Option<String>,
    pub selection: Selection,
}

/// Binding-site definition strategy, fixed when the specification is parsed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "definition_method", rename_all = "snake_case")]
pub enum BindingSiteSpec {
    Coordinates(BoxCoordinates),
    Ligand { ligand_id: String },
    Detection(DetectionSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    PubChem,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilaritySearchSpec {
    pub search_engine: SearchEngine,
    pub min_similarity_percent: u32,
    pub max_num_results: u32,
    pub max_num_druglike: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DockingProgram {
    Smina,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DockingSpec {
    pub program: DockingProgram,
    pub num_poses_per_ligand: u32,
    pub exhaustiveness: u32,
    pub random_seed: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionProgram {
    Plip,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionAnalysisSpec {
    pub program: InteractionProgram,
}

/// Whether an analog that merely equals the reference counts as improved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TiePolicy {
    #[default]
    Inclusive,
    Strict,
}

impl TiePolicy {
    /// `candidate` is at least as good as `reference` when lower is better.
    pub fn at_most(&self, candidate: f64, reference: f64) -> bool {
        match self {
            TiePolicy::Inclusive => candidate <= reference,
            TiePolicy::Strict => candidate < reference,
        }
    }

    /// `candidate` is at least as good as `reference` when higher is better.
    pub fn at_least(&self, candidate: f64, reference: f64) -> bool {
        match self {
            TiePolicy::Inclusive => candidate >= reference,
            TiePolicy::Strict => candidate > reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizedLigandsSpec {
    pub num_results: usize,
    pub selection: Selection,
    pub tie_policy: TiePolicy,
}

/// The fully resolved pipeline specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Specs {
    pub protein: ProteinSpec,
    pub ligand: LigandSpec,
    pub binding_site: BindingSiteSpec,
    pub similarity_search: SimilaritySearchSpec,
    pub docking: DockingSpec,
    pub interaction_analysis: InteractionAnalysisSpec,
    pub optimized_ligands: OptimizedLigandsSpec,
}

// ── Raw table ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SpecRow {
    #[serde(rename = "Subject", default)]
    subject: String,
    #[serde(rename = "Property", default)]
    property: String,
    #[serde(rename = "Value", default)]
    value: Option<String>,
}

/// Subject/property lookup over the raw CSV; empty cells read as absent.
#[derive(Debug, Default)]
struct SpecTable {
    values: BTreeMap<(Subject, String), String>,
}

fn normalise_property(property: &str) -> String {
    let key = property.trim().trim_end_matches('*').trim().to_ascii_lowercase();
    match key.as_str() {
        // The published template misspells this key.
        "minumum similarity [%]" => "minimum similarity [%]".to_string(),
        _ => key,
    }
}

impl SpecTable {
    fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = SpecTable::default();
        for row in csv_reader.deserialize::<SpecRow>() {
            let row = row?;
            if row.subject.is_empty() && row.property.is_empty() {
                continue;
            }
            let Some(subject) = Subject::from_label(&row.subject) else {
                warn!(subject = %row.subject, "Ignoring row with unknown subject");
                continue;
            };
            let property = normalise_property(&row.property);
            if !subject.properties().contains(&property.as_str()) {
                return Err(LeadOptError::Config(format!(
                    "Unknown property `{}` for subject `{}`",
                    row.property.trim(),
                    subject.label()
                )));
            }
            let Some(value) = row.value.filter(|v| !v.trim().is_empty()) else {
                continue;
            };
            table.values.insert((subject, property), value.trim().to_string());
        }
        Ok(table)
    }

    fn get(&self, subject: Subject, property: &str) -> Option<&str> {
        self.values
            .get(&(subject, normalise_property(property)))
            .map(String::as_str)
    }

    fn require(&self, subject: Subject, property: &str) -> Result<&str> {
        self.get(subject, property).ok_or_else(|| {
            LeadOptError::Config(format!(
                "Missing required property `{}` for subject `{}`",
                property,
                subject.label()
            ))
        })
    }

    fn count<T: TryFrom<u64>>(&self, subject: Subject, property: &str, default: T) -> Result<T> {
        match self.get(subject, property) {
            None => Ok(default),
            Some(raw) => parse_count(subject, property, raw),
        }
    }
}

fn parse_count<T: TryFrom<u64>>(subject: Subject, property: &str, raw: &str) -> Result<T> {
    let invalid = || {
        LeadOptError::Config(format!(
            "`{}` of `{}` must be a non-negative integer, got `{}`",
            property,
            subject.label(),
            raw
        ))
    };
    let value: f64 = raw.parse().map_err(|_| invalid())?;
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        return Err(invalid());
    }
    T::try_from(value as u64).map_err(|_| invalid())
}

fn unknown_value(subject: Subject, property: &str, value: &str, allowed: &[&str]) -> LeadOptError {
    LeadOptError::Config(format!(
        "Unknown value `{}` for `{}` of `{}`; expected one of: {}",
        value,
        property,
        subject.label(),
        allowed.join(", ")
    ))
}

// ── Resolution ───────────────────────────────────────────────────────────────

impl Specs {
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            LeadOptError::Config(format!("Cannot open specification {}: {}", path.display(), e))
        })?;
        Self::from_reader(file)
    }

    pub fn from_csv_str(text: &str) -> Result<Self> {
        Self::from_reader(text.as_bytes())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let table = SpecTable::from_reader(reader)?;
        let specs = Specs {
            protein: parse_protein(&table)?,
            ligand: parse_ligand(&table)?,
            binding_site: parse_binding_site(&table)?,
            similarity_search: parse_similarity_search(&table)?,
            docking: parse_docking(&table)?,
            interaction_analysis: parse_interaction_analysis(&table)?,
            optimized_ligands: parse_optimized_ligands(&table)?,
        };
        debug!(?specs, "Specification resolved");
        Ok(specs)
    }
}

fn parse_protein(table: &SpecTable) -> Result<ProteinSpec> {
    let subject = Subject::Protein;
    let raw_type = table.require(subject, "Input Type")?;
    let input_type = match raw_type.to_ascii_lowercase().as_str() {
        "pdb_code" => ProteinInputType::PdbCode,
        "pdb_filepath" => ProteinInputType::PdbFilepath,
        _ => return Err(unknown_value(subject, "Input Type", raw_type, &["pdb_code", "pdb_filepath"])),
    };
    Ok(ProteinSpec {
        input_type,
        input_value: table.require(subject, "Input Value")?.to_string(),
    })
}

fn parse_ligand(table: &SpecTable) -> Result<LigandSpec> {
    let subject = Subject::Ligand;
    let raw_type = table.require(subject, "Input Type")?;
    let input_type = raw_type.parse::<IdentifierType>().map_err(|_| {
        let allowed: Vec<&str> = IdentifierType::ALL.iter().map(|t| t.as_str()).collect();
        unknown_value(subject, "Input Type", raw_type, &allowed)
    })?;
    Ok(LigandSpec {
        input_type,
        input_value: table.require(subject, "Input Value")?.to_string(),
    })
}

fn parse_selection(
    table: &SpecTable,
    subject: Subject,
    allowed_columns: &[&str],
    default_sorting: &[&str],
    default_function: &str,
) -> Result<Selection> {
    let method = table
        .get(subject, "Selection Method")
        .unwrap_or("sorting")
        .to_ascii_lowercase();
    let criteria = table.get(subject, "Selection Criteria");

    match method.as_str() {
        "sorting" => {
            let columns: Vec<String> = match criteria {
                None => default_sorting.iter().map(|c| c.to_string()).collect(),
                Some(raw) => raw
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
            };
            if columns.is_empty() {
                return Err(LeadOptError::Config(format!(
                    "Empty sorting criteria for `{}`",
                    subject.label()
                )));
            }
            for column in &columns {
                if !allowed_columns.contains(&column.as_str()) {
                    return Err(unknown_value(subject, "Selection Criteria", column, allowed_columns));
                }
            }
            Ok(Selection::Sorting(columns))
        }
        "function" => {
            let source = criteria.unwrap_or(default_function);
            Ok(Selection::Function(ScoreExpr::parse_with_columns(source, allowed_columns)?))
        }
        other => Err(unknown_value(subject, "Selection Method", other, &["sorting", "function"])),
    }
}

fn parse_coordinates(raw: &str) -> Result<BoxCoordinates> {
    let numbers = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| LeadOptError::Config(format!("Invalid binding-site coordinates `{}`", raw)))?;
    if numbers.len() != 6 {
        return Err(LeadOptError::Config(format!(
            "Binding-site coordinates need 6 numbers (center x y z, size x y z), got {}",
            numbers.len()
        )));
    }
    Ok(BoxCoordinates {
        center: [numbers[0], numbers[1], numbers[2]],
        size: [numbers[3], numbers[4], numbers[5]],
    })
}

fn parse_binding_site(table: &SpecTable) -> Result<BindingSiteSpec> {
    let subject = Subject::BindingSite;
    let method = table
        .get(subject, "Definition Method")
        .unwrap_or("detection")
        .to_ascii_lowercase();

    match method.as_str() {
        "coordinates" => Ok(BindingSiteSpec::Coordinates(parse_coordinates(
            table.require(subject, "Coordinates")?,
        )?)),
        "ligand" => Ok(BindingSiteSpec::Ligand {
            ligand_id: table.require(subject, "Ligand")?.to_string(),
        }),
        "detection" => {
            let detection = table
                .get(subject, "Detection Method")
                .unwrap_or("dogsitescorer")
                .to_ascii_lowercase();
            let method = match detection.as_str() {
                "dogsitescorer" => DetectionMethod::DogSiteScorer,
                other => return Err(unknown_value(subject, "Detection Method", other, &["dogsitescorer"])),
            };
            Ok(BindingSiteSpec::Detection(DetectionSpec {
                method,
                protein_chain_id: table.get(subject, "Protein Chain-ID").map(str::to_string),
                protein_ligand_id: table.get(subject, "Protein Ligand-ID").map(str::to_string),
                selection: parse_selection(
                    table,
                    subject,
                    POCKET_CRITERIA,
                    DEFAULT_POCKET_SORTING,
                    DEFAULT_POCKET_FUNCTION,
                )?,
            }))
        }
        other => Err(unknown_value(
            subject,
            "Definition Method",
            other,
            &["detection", "ligand", "coordinates"],
        )),
    }
}

fn parse_similarity_search(table: &SpecTable) -> Result<SimilaritySearchSpec> {
    let subject = Subject::LigandSimilaritySearch;
    let engine = table.get(subject, "Search Engine").unwrap_or("pubchem").to_ascii_lowercase();
    let search_engine = match engine.as_str() {
        "pubchem" => SearchEngine::PubChem,
        other => return Err(unknown_value(subject, "Search Engine", other, &["pubchem"])),
    };
    let min_similarity_percent =
        table.count(subject, "Minimum Similarity [%]", default_min_similarity_percent())?;
    if min_similarity_percent > 100 {
        return Err(LeadOptError::Config(format!(
            "Minimum similarity must be within 0-100 %, got {}",
            min_similarity_percent
        )));
    }
    Ok(SimilaritySearchSpec {
        search_engine,
        min_similarity_percent,
        max_num_results: table.count(subject, "Maximum Number of Results", default_max_num_results())?,
        max_num_druglike: table.count(
            subject,
            "Maximum Number of Most Drug-Like Analogs to Continue With",
            default_max_num_druglike(),
        )?,
    })
}

fn parse_docking(table: &SpecTable) -> Result<DockingSpec> {
    let subject = Subject::Docking;
    let program = table.get(subject, "Program").unwrap_or("smina").to_ascii_lowercase();
    let program = match program.as_str() {
        "smina" => DockingProgram::Smina,
        other => return Err(unknown_value(subject, "Program", other, &["smina"])),
    };
    let random_seed = match table.get(subject, "Random Seed") {
        None => default_random_seed(),
        Some(raw) if raw.eq_ignore_ascii_case("none") => None,
        Some(raw) => Some(raw.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64).ok_or_else(
            || LeadOptError::Config(format!("Random Seed must be an integer or `none`, got `{}`", raw)),
        )?),
    };
    Ok(DockingSpec {
        program,
        num_poses_per_ligand: table.count(subject, "Number of Docking Poses per Ligand", default_num_poses())?,
        exhaustiveness: table.count(subject, "Exhaustiveness", default_exhaustiveness())?,
        random_seed,
    })
}

fn parse_interaction_analysis(table: &SpecTable) -> Result<InteractionAnalysisSpec> {
    let subject = Subject::InteractionAnalysis;
    let program = table.get(subject, "Program").unwrap_or("plip").to_ascii_lowercase();
    match program.as_str() {
        "plip" => Ok(InteractionAnalysisSpec { program: InteractionProgram::Plip }),
        other => Err(unknown_value(subject, "Program", other, &["plip"])),
    }
}

fn parse_optimized_ligands(table: &SpecTable) -> Result<OptimizedLigandsSpec> {
    let subject = Subject::OptimizedLigand;
    let tie_policy = match table.get(subject, "Tie Policy").map(str::to_ascii_lowercase).as_deref() {
        None | Some("inclusive") => TiePolicy::Inclusive,
        Some("strict") => TiePolicy::Strict,
        Some(other) => return Err(unknown_value(subject, "Tie Policy", other, &["inclusive", "strict"])),
    };
    let num_results = table.count(subject, "Number of Results", default_num_results())?;
    if num_results == 0 {
        return Err(LeadOptError::Config("Number of Results must be at least 1".into()));
    }
    Ok(OptimizedLigandsSpec {
        num_results,
        selection: parse_selection(
            table,
            subject,
            OPTIMIZED_LIGAND_CRITERIA,
            DEFAULT_LIGAND_SORTING,
            DEFAULT_LIGAND_FUNCTION,
        )?,
        tie_policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = "\
Subject,Property,Value,Description
Protein,Input Type*,pdb_code,
Protein,Input Value*,3W32,
Ligand,Input Type*,smiles,
Ligand,Input Value*,COCCOC1=C(C=C2C(=C1)C(=NC=N2)NC3=CC(=C(C=C3)F)Cl)OCCOC,
";

    #[test]
    fn test_defaults_applied() {
        let specs = Specs::from_csv_str(MINIMAL).unwrap();
        assert_eq!(specs.protein.input_type, ProteinInputType::PdbCode);
        assert_eq!(specs.protein.input_value, "3W32");
        assert_eq!(specs.ligand.input_type, IdentifierType::Smiles);
        match &specs.binding_site {
            BindingSiteSpec::Detection(d) => {
                assert_eq!(d.method, DetectionMethod::DogSiteScorer);
                assert_eq!(d.protein_chain_id, None);
                assert_eq!(d.selection, Selection::Sorting(vec!["lig_cov".into(), "poc_cov".into()]));
            }
            other => panic!("unexpected binding site spec {:?}", other),
        }
        assert_eq!(specs.similarity_search.min_similarity_percent, 80);
        assert_eq!(specs.similarity_search.max_num_results, 100);
        assert_eq!(specs.similarity_search.max_num_druglike, 30);
        assert_eq!(specs.docking.num_poses_per_ligand, 5);
        assert_eq!(specs.docking.exhaustiveness, 10);
        assert_eq!(specs.docking.random_seed, Some(1111));
        assert_eq!(specs.optimized_ligands.num_results, 1);
        assert_eq!(specs.optimized_ligands.tie_policy, TiePolicy::Inclusive);
        assert_eq!(
            specs.optimized_ligands.selection,
            Selection::Sorting(vec!["affinity".into(), "total_num_interactions".into()])
        );
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let text = format!(
            "{}Binding Site,Definition Method,detection,\n\
             Binding Site,Selection Method,function,\n\
             Optimized Ligand,Selection Method,function,\n\
             Ligand Similarity Search,Minumum Similarity [%],75,\n",
            MINIMAL
        );
        let first = Specs::from_csv_str(&text).unwrap();
        let second = Specs::from_csv_str(&text).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.similarity_search.min_similarity_percent, 75);
    }

    #[test]
    fn test_coordinates_strategy() {
        let text = format!("{}Binding Site,Definition Method,coordinates,\nBinding Site,Coordinates,1.5 -2 3 20 20 20,\n", MINIMAL);
        let specs = Specs::from_csv_str(&text).unwrap();
        assert_eq!(
            specs.binding_site,
            BindingSiteSpec::Coordinates(BoxCoordinates { center: [1.5, -2.0, 3.0], size: [20.0, 20.0, 20.0] })
        );
    }

    #[test]
    fn test_ligand_strategy_requires_ligand() {
        let text = format!("{}Binding Site,Definition Method,ligand,\n", MINIMAL);
        assert!(matches!(Specs::from_csv_str(&text), Err(LeadOptError::Config(_))));

        let text = format!("{}Binding Site,Definition Method,ligand,\nBinding Site,LIGAND,W32,\n", MINIMAL);
        let specs = Specs::from_csv_str(&text).unwrap();
        assert_eq!(specs.binding_site, BindingSiteSpec::Ligand { ligand_id: "W32".into() });
    }

    #[test]
    fn test_unknown_enum_values_rejected() {
        for extra in [
            "Binding Site,Definition Method,guess,\n",
            "Binding Site,Selection Method,random,\n",
            "Binding Site,Selection Criteria,\"lig_cov, nonsense\",\n",
            "Docking,Program,vina,\n",
            "Optimized Ligand,Tie Policy,sometimes,\n",
            "Optimized Ligand,Selection Method,function,\nOptimized Ligand,Selection Criteria,df[pIC50] * 2,\n",
        ] {
            let text = format!("{}{}", MINIMAL, extra);
            assert!(matches!(Specs::from_csv_str(&text), Err(LeadOptError::Config(_))), "accepted: {}", extra);
        }
    }

    #[test]
    fn test_missing_required_property() {
        let text = "Subject,Property,Value\nProtein,Input Type*,pdb_code\n";
        assert!(matches!(Specs::from_csv_str(text), Err(LeadOptError::Config(_))));
    }

    #[test]
    fn test_misspelled_property_rejected() {
        let text = format!("{}Docking,Exhaustivenes,50,typo\n", MINIMAL);
        match Specs::from_csv_str(&text) {
            Err(LeadOptError::Config(msg)) => {
                assert!(msg.contains("Exhaustivenes"), "{}", msg);
                assert!(msg.contains("Docking"), "{}", msg);
            }
            other => panic!("misspelled property accepted: {:?}", other),
        }
        // the published template's spelling and a trailing `*` are still recognised
        let text = format!("{}Ligand Similarity Search,Minumum Similarity [%],75,\nDocking,Exhaustiveness*,50,\n", MINIMAL);
        let specs = Specs::from_csv_str(&text).unwrap();
        assert_eq!(specs.similarity_search.min_similarity_percent, 75);
        assert_eq!(specs.docking.exhaustiveness, 50);
    }

    #[test]
    fn test_seed_can_be_disabled() {
        let text = format!("{}Docking,Random Seed,none,\n", MINIMAL);
        assert_eq!(Specs::from_csv_str(&text).unwrap().docking.random_seed, None);
    }

    #[test]
    fn test_tie_policy_predicates() {
        assert!(TiePolicy::Inclusive.at_most(-8.0, -8.0));
        assert!(!TiePolicy::Strict.at_most(-8.0, -8.0));
        assert!(TiePolicy::Strict.at_most(-8.1, -8.0));
        assert!(TiePolicy::Inclusive.at_least(5.0, 5.0));
        assert!(!TiePolicy::Strict.at_least(5.0, 5.0));
    }
}
