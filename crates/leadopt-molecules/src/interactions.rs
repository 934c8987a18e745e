//! Protein-ligand interaction profiling of docking poses with PLIP.
//!
//! Each pose is merged with the receptor into a complex PDB file, profiled,
//! and its interactions are counted per type. The receptor PDBQT numbers its
//! residues from 1, so reported residue numbers are shifted back onto the
//! original numbering before anything else sees them.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use leadopt_common::{LeadOptError, Result};

use crate::docking::{DockedLigand, PoseScore, Receptor};
use crate::fingerprint::round_to;
use crate::ligand::PropertyTable;
use crate::process::run_checked;

pub const INTERACTION_RESULTS_FILE: &str = "interaction_results.csv";

// ── Interaction types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    HBond,
    Hydrophobic,
    SaltBridge,
    WaterBridge,
    PiStacking,
    PiCation,
    Halogen,
    Metal,
}

impl InteractionType {
    pub const ALL: [InteractionType; 8] = [
        InteractionType::HBond,
        InteractionType::Hydrophobic,
        InteractionType::SaltBridge,
        InteractionType::WaterBridge,
        InteractionType::PiStacking,
        InteractionType::PiCation,
        InteractionType::Halogen,
        InteractionType::Metal,
    ];

    /// Column name in the results tables.
    pub fn column(&self) -> &'static str {
        match self {
            InteractionType::HBond => "h_bond",
            InteractionType::Hydrophobic => "hydrophobic",
            InteractionType::SaltBridge => "salt_bridge",
            InteractionType::WaterBridge => "water_bridge",
            InteractionType::PiStacking => "pi_stacking",
            InteractionType::PiCation => "pi_cation",
            InteractionType::Halogen => "halogen",
            InteractionType::Metal => "metal",
        }
    }

    fn from_xml_element(name: &[u8]) -> Option<Self> {
        match name {
            b"hydrogen_bond" => Some(InteractionType::HBond),
            b"hydrophobic_interaction" => Some(InteractionType::Hydrophobic),
            b"salt_bridge" => Some(InteractionType::SaltBridge),
            b"water_bridge" => Some(InteractionType::WaterBridge),
            b"pi_stack" => Some(InteractionType::PiStacking),
            b"pi_cation_interaction" => Some(InteractionType::PiCation),
            b"halogen_bond" => Some(InteractionType::Halogen),
            b"metal_complex" => Some(InteractionType::Metal),
            _ => None,
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for InteractionType {
    type Err = LeadOptError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        InteractionType::ALL
            .into_iter()
            .find(|t| t.column() == key)
            .ok_or_else(|| {
                let known: Vec<&str> = InteractionType::ALL.iter().map(|t| t.column()).collect();
                LeadOptError::Config(format!("Unknown interaction type `{}` (expected one of {:?})", s, known))
            })
    }
}

/// One protein residue taking part in one interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: InteractionType,
    pub resnr: i32,
    pub restype: String,
    pub reschain: String,
    pub distance: Option<f64>,
}

// ── PLIP report parsing ──────────────────────────────────────────────────────

#[derive(Default)]
struct PartialInteraction {
    resnr: Option<String>,
    restype: String,
    reschain: String,
    distance: Option<f64>,
}

/// Reads the interactions of the first binding site in a PLIP `report.xml`.
pub fn parse_plip_report(xml: &str) -> Result<Vec<Interaction>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut interactions = Vec::new();
    let mut sites_seen = 0u32;
    let mut in_site = false;
    let mut current: Option<(InteractionType, PartialInteraction)> = None;
    // Element depth below the open interaction element.
    let mut depth = 0u32;
    let mut field: Option<Vec<u8>> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                if name == b"bindingsite" {
                    sites_seen += 1;
                    in_site = sites_seen == 1;
                } else if current.is_some() {
                    depth += 1;
                    field = (depth == 1).then_some(name);
                } else if in_site {
                    if let Some(kind) = InteractionType::from_xml_element(&name) {
                        current = Some((kind, PartialInteraction::default()));
                        depth = 0;
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let (Some((_, partial)), Some(name)) = (current.as_mut(), field.as_deref()) {
                    let text = e
                        .unescape()
                        .map_err(|err| LeadOptError::Parse(format!("PLIP report: {}", err)))?
                        .to_string();
                    match name {
                        b"resnr" => partial.resnr = Some(text),
                        b"restype" => partial.restype = text,
                        b"reschain" => partial.reschain = text,
                        b"dist" | b"dist_d-a" | b"centdist" | b"dist_a-w" => {
                            if partial.distance.is_none() {
                                partial.distance = text.parse().ok();
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name();
                if name.as_ref() == b"bindingsite" {
                    in_site = false;
                } else if current.is_some() && depth > 0 {
                    depth -= 1;
                    field = None;
                } else if let Some((kind, partial)) = current.take() {
                    interactions.push(finish_interaction(kind, partial)?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LeadOptError::Parse(format!("PLIP report: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    if sites_seen == 0 {
        return Err(LeadOptError::Parse("PLIP report has no binding site".into()));
    }
    Ok(interactions)
}

fn finish_interaction(kind: InteractionType, partial: PartialInteraction) -> Result<Interaction> {
    let resnr = partial
        .resnr
        .as_deref()
        .and_then(|r| r.trim().parse().ok())
        .ok_or_else(|| LeadOptError::Parse(format!("PLIP {} without residue number", kind)))?;
    Ok(Interaction {
        kind,
        resnr,
        restype: partial.restype,
        reschain: partial.reschain,
        distance: partial.distance,
    })
}

/// Shifts residue numbers from the 1-based receptor PDBQT numbering back to
/// the protein's, whose first residue is `first_residue_number`.
pub fn correct_residue_numbers(interactions: &mut [Interaction], first_residue_number: i32) {
    for interaction in interactions {
        interaction.resnr += first_residue_number - 1;
    }
}

/// Receptor and pose ATOM records (first 67 columns) around a `COMPND` line
/// naming the ligand.
pub fn build_complex(receptor_pdbqt: &str, pose_pdbqt: &str, ligand_id: &str) -> String {
    let atom_block = |text: &str| -> String {
        text.lines()
            .filter(|l| l.starts_with("ATOM"))
            .map(|l| l.get(..67).unwrap_or(l).trim())
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "{}\nCOMPND    {}\n{}",
        atom_block(receptor_pdbqt),
        ligand_id,
        atom_block(pose_pdbqt)
    )
}

// ── Profiler seam ────────────────────────────────────────────────────────────

/// An interaction profiler: analyses a complex file and returns its XML report.
#[async_trait]
pub trait InteractionProfiler: Send + Sync {
    async fn profile(&self, complex: &Path, output_dir: &Path) -> Result<String>;
}

/// Wrapper for the `plip` command-line tool.
pub struct PlipRunner {
    executable_path: PathBuf,
}

impl PlipRunner {
    pub fn new<P: AsRef<Path>>(executable_path: P) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl InteractionProfiler for PlipRunner {
    async fn profile(&self, complex: &Path, output_dir: &Path) -> Result<String> {
        fs::create_dir_all(output_dir).await?;
        let mut cmd = Command::new(&self.executable_path);
        cmd.arg("-f").arg(complex).arg("-x").arg("-o").arg(output_dir);
        run_checked("plip", &mut cmd).await?;
        Ok(fs::read_to_string(output_dir.join("report.xml")).await?)
    }
}

// ── Results ──────────────────────────────────────────────────────────────────

/// Interactions of one docking pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseInteractions {
    pub cid: String,
    pub pose: u32,
    pub score: PoseScore,
    pub interactions: Vec<Interaction>,
}

impl PoseInteractions {
    pub fn count(&self, kind: InteractionType) -> u32 {
        self.interactions.iter().filter(|i| i.kind == kind).count() as u32
    }

    pub fn total(&self) -> u32 {
        self.interactions.len() as u32
    }

    pub fn involves(&self, kind: InteractionType, resnr: i32) -> bool {
        self.interactions.iter().any(|i| i.kind == kind && i.resnr == resnr)
    }

    pub fn row(&self) -> InteractionRow {
        InteractionRow {
            cid: self.cid.clone(),
            mode: self.pose,
            affinity: self.score.affinity,
            rmsd_lb: self.score.rmsd_lb,
            rmsd_ub: self.score.rmsd_ub,
            h_bond: self.count(InteractionType::HBond),
            hydrophobic: self.count(InteractionType::Hydrophobic),
            salt_bridge: self.count(InteractionType::SaltBridge),
            water_bridge: self.count(InteractionType::WaterBridge),
            pi_stacking: self.count(InteractionType::PiStacking),
            pi_cation: self.count(InteractionType::PiCation),
            halogen: self.count(InteractionType::Halogen),
            metal: self.count(InteractionType::Metal),
            total_num_interactions: self.total(),
        }
    }
}

/// One row of `interaction_results.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRow {
    #[serde(rename = "CID")]
    pub cid: String,
    pub mode: u32,
    pub affinity: f64,
    pub rmsd_lb: f64,
    pub rmsd_ub: f64,
    pub h_bond: u32,
    pub hydrophobic: u32,
    pub salt_bridge: u32,
    pub water_bridge: u32,
    pub pi_stacking: u32,
    pub pi_cation: u32,
    pub halogen: u32,
    pub metal: u32,
    pub total_num_interactions: u32,
}

impl InteractionRow {
    pub fn count(&self, kind: InteractionType) -> u32 {
        match kind {
            InteractionType::HBond => self.h_bond,
            InteractionType::Hydrophobic => self.hydrophobic,
            InteractionType::SaltBridge => self.salt_bridge,
            InteractionType::WaterBridge => self.water_bridge,
            InteractionType::PiStacking => self.pi_stacking,
            InteractionType::PiCation => self.pi_cation,
            InteractionType::Halogen => self.halogen,
            InteractionType::Metal => self.metal,
        }
    }
}

/// Per-analog averages over all of its poses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InteractionSummary {
    pub cid: String,
    pub average_num: BTreeMap<InteractionType, f64>,
    pub average_num_total_interactions: f64,
    pub num_total_interactions_highest: u32,
}

impl InteractionSummary {
    pub fn from_poses(cid: &str, poses: &[&PoseInteractions]) -> Self {
        let n = poses.len().max(1) as f64;
        let average_num = InteractionType::ALL
            .iter()
            .map(|&kind| {
                let sum: u32 = poses.iter().map(|p| p.count(kind)).sum();
                (kind, round_to(sum as f64 / n, 1))
            })
            .collect();
        let total: u32 = poses.iter().map(|p| p.total()).sum();
        InteractionSummary {
            cid: cid.to_string(),
            average_num,
            average_num_total_interactions: round_to(total as f64 / n, 1),
            num_total_interactions_highest: poses.iter().map(|p| p.total()).max().unwrap_or(0),
        }
    }

    pub fn property_table(&self) -> PropertyTable {
        let mut table = PropertyTable::default();
        table.push("average_num_total_interactions", self.average_num_total_interactions);
        for (kind, avg) in &self.average_num {
            table.push(&format!("average_num_{}", kind.column()), avg);
        }
        table.push("num_total_interactions_highest", self.num_total_interactions_highest);
        table
    }
}

/// How a set of interaction constraints combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    All,
    Any,
}

/// An interaction type with a residue number, e.g. `h_bond:793`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionConstraint {
    pub kind: InteractionType,
    pub resnr: i32,
}

impl FromStr for InteractionConstraint {
    type Err = LeadOptError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, resnr) = s
            .split_once(':')
            .ok_or_else(|| LeadOptError::Config(format!("Expected <type>:<residue>, got `{}`", s)))?;
        Ok(InteractionConstraint {
            kind: kind.parse()?,
            resnr: resnr
                .trim()
                .parse()
                .map_err(|_| LeadOptError::Config(format!("Invalid residue number in `{}`", s)))?,
        })
    }
}

/// (CID, pose) pairs whose interactions satisfy the constraints.
pub fn find_poses(
    poses: &[PoseInteractions],
    constraints: &[InteractionConstraint],
    combinator: Combinator,
) -> Vec<(String, u32)> {
    poses
        .iter()
        .filter(|p| {
            let hits = constraints.iter().filter(|c| p.involves(c.kind, c.resnr)).count();
            match combinator {
                Combinator::All => hits == constraints.len(),
                Combinator::Any => hits > 0,
            }
        })
        .map(|p| (p.cid.clone(), p.pose))
        .collect()
}

/// Outcome of the interaction stage.
#[derive(Debug, Clone, Serialize)]
pub struct InteractionAnalysis {
    pub poses: Vec<PoseInteractions>,
    pub summaries: Vec<InteractionSummary>,
}

impl InteractionAnalysis {
    pub fn find_poses(&self, constraints: &[InteractionConstraint], combinator: Combinator) -> Vec<(String, u32)> {
        find_poses(&self.poses, constraints, combinator)
    }

    pub fn rows(&self) -> Vec<InteractionRow> {
        self.poses.iter().map(PoseInteractions::row).collect()
    }

    pub fn summary(&self, cid: &str) -> Option<&InteractionSummary> {
        self.summaries.iter().find(|s| s.cid == cid)
    }
}

pub fn pose_json_path(dir: &Path, cid: &str, pose: u32) -> PathBuf {
    dir.join(format!("CID_{}_{}_interactions.json", cid, pose))
}

/// Profiles every pose of every docked ligand, at most `concurrency` at a time.
pub async fn analyze(
    receptor: &Receptor,
    first_residue_number: i32,
    docked: &[DockedLigand],
    profiler: &dyn InteractionProfiler,
    output_dir: &Path,
    concurrency: usize,
) -> Result<InteractionAnalysis> {
    fs::create_dir_all(output_dir).await?;
    let receptor_pdbqt = fs::read_to_string(&receptor.pdbqt).await?;

    let jobs: Vec<(&DockedLigand, PoseScore, &Path)> = docked
        .iter()
        .flat_map(|l| l.poses.iter().zip(&l.pose_files).map(move |(s, f)| (l, *s, f.as_path())))
        .collect();

    let poses: Vec<PoseInteractions> = stream::iter(jobs)
        .map(|(ligand, score, pose_file)| {
            profile_pose(&receptor_pdbqt, first_residue_number, ligand, score, pose_file, profiler, output_dir)
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let summaries = docked
        .iter()
        .map(|l| {
            let own: Vec<&PoseInteractions> = poses.iter().filter(|p| p.cid == l.cid).collect();
            InteractionSummary::from_poses(&l.cid, &own)
        })
        .collect();
    let analysis = InteractionAnalysis { poses, summaries };

    write_interaction_results(&output_dir.join(INTERACTION_RESULTS_FILE), &analysis.rows())?;
    info!(poses = analysis.poses.len(), "Interaction analysis complete");
    Ok(analysis)
}

async fn profile_pose(
    receptor_pdbqt: &str,
    first_residue_number: i32,
    ligand: &DockedLigand,
    score: PoseScore,
    pose_file: &Path,
    profiler: &dyn InteractionProfiler,
    output_dir: &Path,
) -> Result<PoseInteractions> {
    let stem = format!("CID_{}_{}", ligand.cid, score.mode);
    let complex = output_dir.join(format!("{}.pdb", stem));
    let pose_text = fs::read_to_string(pose_file).await?;
    fs::write(&complex, build_complex(receptor_pdbqt, &pose_text, &ligand.cid)).await?;

    let report = profiler.profile(&complex, &output_dir.join(&stem)).await?;
    let mut interactions = parse_plip_report(&report)?;
    correct_residue_numbers(&mut interactions, first_residue_number);
    if interactions.is_empty() {
        warn!(cid = %ligand.cid, pose = score.mode, "Pose has no interactions");
    }

    let pose = PoseInteractions {
        cid: ligand.cid.clone(),
        pose: score.mode,
        score,
        interactions,
    };
    fs::write(
        pose_json_path(output_dir, &pose.cid, pose.pose),
        serde_json::to_string_pretty(&pose)?,
    )
    .await?;
    debug!(cid = %pose.cid, pose = pose.pose, total = pose.total(), "Pose profiled");
    Ok(pose)
}

pub fn write_interaction_results(path: &Path, rows: &[InteractionRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_interaction_results(path: &Path) -> Result<Vec<InteractionRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Reloads the per-pose payloads of a finished run from the folder holding
/// `interaction_results.csv`.
pub fn load_pose_interactions(results_csv: &Path) -> Result<Vec<PoseInteractions>> {
    let dir = results_csv.parent().unwrap_or_else(|| Path::new("."));
    read_interaction_results(results_csv)?
        .iter()
        .map(|row| -> Result<PoseInteractions> {
            let path = pose_json_path(dir, &row.cid, row.mode);
            let text = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&text)?)
        })
        .collect()
}
