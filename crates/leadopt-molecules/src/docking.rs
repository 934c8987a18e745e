//! Molecular docking with smina.
//!
//! The receptor is converted once; every ligand is then converted, docked in
//! the binding-site box, its multi-model output split into one file per pose
//! and its log parsed into a per-pose score table.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use leadopt_common::{LeadOptError, Result};

use crate::ligand::{remove_counterion, Ligand, PropertyTable};
use crate::obabel::ObabelRunner;
use crate::pdb::extract_protein;
use crate::process::run_checked;
use crate::protein::Protein;
use crate::specs::{BoxCoordinates, DockingSpec};

pub const RESULTS_SUMMARY_FILE: &str = "Results_Summary.csv";

const LOG_TABLE_SEPARATOR: &str = "-----+------------+----------+----------";

// ── Engine seam ──────────────────────────────────────────────────────────────

/// Everything one docking run needs.
#[derive(Debug, Clone)]
pub struct DockingJob {
    pub ligand: PathBuf,
    pub receptor: PathBuf,
    pub site: BoxCoordinates,
    pub out: PathBuf,
    pub log: PathBuf,
    pub num_poses: u32,
    pub exhaustiveness: u32,
    pub seed: Option<i64>,
}

/// A docking program: writes the poses to `job.out` and returns its log.
#[async_trait]
pub trait DockingEngine: Send + Sync {
    async fn dock(&self, job: &DockingJob) -> Result<String>;
}

/// Wrapper for the `smina` executable.
pub struct SminaRunner {
    executable_path: PathBuf,
}

impl SminaRunner {
    pub fn new<P: AsRef<Path>>(executable_path: P) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DockingEngine for SminaRunner {
    async fn dock(&self, job: &DockingJob) -> Result<String> {
        info!("Running smina on {:?}", job.ligand);
        let [cx, cy, cz] = job.site.center;
        let [sx, sy, sz] = job.site.size;

        let mut cmd = Command::new(&self.executable_path);
        cmd.arg("--ligand")
            .arg(&job.ligand)
            .arg("--receptor")
            .arg(&job.receptor)
            .arg("--out")
            .arg(&job.out)
            .arg("--center_x")
            .arg(cx.to_string())
            .arg("--center_y")
            .arg(cy.to_string())
            .arg("--center_z")
            .arg(cz.to_string())
            .arg("--size_x")
            .arg(sx.to_string())
            .arg("--size_y")
            .arg(sy.to_string())
            .arg("--size_z")
            .arg(sz.to_string())
            .arg("--num_modes")
            .arg(job.num_poses.to_string())
            .arg("--exhaustiveness")
            .arg(job.exhaustiveness.to_string())
            .arg("--log")
            .arg(&job.log);
        if let Some(seed) = job.seed {
            cmd.arg("--seed").arg(seed.to_string());
        }

        let output = run_checked("smina", &mut cmd).await?;
        debug!("smina completed successfully. Output in {:?}", job.out);
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

// ── Log and pose parsing ─────────────────────────────────────────────────────

/// One row of the smina result table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseScore {
    pub mode: u32,
    /// kcal/mol; lower is better.
    pub affinity: f64,
    pub rmsd_lb: f64,
    pub rmsd_ub: f64,
}

/// Parses the table between the dashed separator and the `Refine` line.
pub fn parse_smina_log(log: &str) -> Result<Vec<PoseScore>> {
    let (_, table) = log
        .split_once(LOG_TABLE_SEPARATOR)
        .ok_or_else(|| LeadOptError::Parse("smina log has no result table".into()))?;
    let table = table.split("Refine").next().unwrap_or_default();

    let mut poses = Vec::new();
    for line in table.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse_log_row(line) {
            Some(pose) => poses.push(pose),
            None => return Err(LeadOptError::Parse(format!("Unexpected smina log row `{}`", line))),
        }
    }
    if poses.is_empty() {
        return Err(LeadOptError::Parse("smina log lists no poses".into()));
    }
    Ok(poses)
}

fn parse_log_row(line: &str) -> Option<PoseScore> {
    let mut fields = line.split_whitespace();
    Some(PoseScore {
        mode: fields.next()?.parse().ok()?,
        affinity: fields.next()?.parse().ok()?,
        rmsd_lb: fields.next()?.parse().ok()?,
        rmsd_ub: fields.next()?.parse().ok()?,
    })
}

/// Splits a multi-model PDBQT into one text per `MODEL`/`ENDMDL` block.
/// A file without model records is a single pose.
pub fn split_poses(pdbqt: &str) -> Vec<String> {
    let mut poses = Vec::new();
    let mut current: Option<String> = None;
    for line in pdbqt.lines() {
        if line.starts_with("MODEL") {
            current = Some(String::new());
        }
        if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
        if line.starts_with("ENDMDL") {
            poses.extend(current.take());
        }
    }
    if poses.is_empty() && !pdbqt.trim().is_empty() {
        poses.push(pdbqt.to_string());
    }
    poses
}

// ── Statistics ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DockingStats {
    pub binding_affinity_best: f64,
    pub binding_affinity_mean: f64,
    pub binding_affinity_std: f64,
    pub docking_poses_dist_rmsd_lb_mean: f64,
    pub docking_poses_dist_rmsd_lb_std: f64,
    pub docking_poses_dist_rmsd_ub_mean: f64,
    pub docking_poses_dist_rmsd_ub_std: f64,
}

impl DockingStats {
    pub fn from_poses(poses: &[PoseScore]) -> Result<Self> {
        if poses.is_empty() {
            return Err(LeadOptError::Parse("No poses to summarise".into()));
        }
        let affinities: Vec<f64> = poses.iter().map(|p| p.affinity).collect();
        let lb: Vec<f64> = poses.iter().map(|p| p.rmsd_lb).collect();
        let ub: Vec<f64> = poses.iter().map(|p| p.rmsd_ub).collect();
        Ok(DockingStats {
            binding_affinity_best: affinities.iter().copied().fold(f64::INFINITY, f64::min),
            binding_affinity_mean: mean(&affinities),
            binding_affinity_std: sample_std(&affinities),
            docking_poses_dist_rmsd_lb_mean: mean(&lb),
            docking_poses_dist_rmsd_lb_std: sample_std(&lb),
            docking_poses_dist_rmsd_ub_mean: mean(&ub),
            docking_poses_dist_rmsd_ub_std: sample_std(&ub),
        })
    }

    pub fn property_table(&self) -> PropertyTable {
        let mut table = PropertyTable::default();
        table.push("binding_affinity_best", self.binding_affinity_best);
        table.push("binding_affinity_mean", self.binding_affinity_mean);
        table.push("binding_affinity_std", self.binding_affinity_std);
        table.push("docking_poses_dist_rmsd_lb_mean", self.docking_poses_dist_rmsd_lb_mean);
        table.push("docking_poses_dist_rmsd_lb_std", self.docking_poses_dist_rmsd_lb_std);
        table.push("docking_poses_dist_rmsd_ub_mean", self.docking_poses_dist_rmsd_ub_mean);
        table.push("docking_poses_dist_rmsd_ub_std", self.docking_poses_dist_rmsd_ub_std);
        table
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1); zero for a single value.
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

// ── Stage ────────────────────────────────────────────────────────────────────

/// Where ligand and receptor PDBQT files come from.
pub enum Preparation<'a> {
    /// Convert with OpenBabel.
    Convert(&'a ObabelRunner),
    /// Reuse previously converted files from this folder.
    Frozen(PathBuf),
}

/// The receptor in both formats.
#[derive(Debug, Clone, Serialize)]
pub struct Receptor {
    pub pdb: PathBuf,
    pub pdbqt: PathBuf,
}

/// Writes `<code>_extracted_protein.pdb` and its docking-ready PDBQT.
#[instrument(skip(protein, preparation))]
pub async fn prepare_receptor(protein: &Protein, preparation: &Preparation<'_>, output_dir: &Path) -> Result<Receptor> {
    fs::create_dir_all(output_dir).await?;
    let pdb = output_dir.join(format!("{}_extracted_protein.pdb", protein.pdb_code));
    fs::write(&pdb, extract_protein(protein.content())).await?;

    let pdbqt_name = format!("{}_extracted_protein_ready_for_docking.pdbqt", protein.pdb_code);
    let pdbqt = match preparation {
        Preparation::Convert(obabel) => obabel.protein_to_pdbqt(&pdb, &output_dir.join(pdbqt_name)).await?,
        Preparation::Frozen(dir) => frozen_file(dir, &pdbqt_name)?,
    };
    Ok(Receptor { pdb, pdbqt })
}

fn frozen_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(LeadOptError::Config(format!("Frozen docking file {} is missing", path.display())))
    }
}

/// Docking outcome for one ligand.
#[derive(Debug, Clone, Serialize)]
pub struct DockedLigand {
    pub cid: String,
    pub drug_score_total: f64,
    pub poses: Vec<PoseScore>,
    /// One file per pose, in mode order.
    pub pose_files: Vec<PathBuf>,
    pub stats: DockingStats,
}

impl DockedLigand {
    pub fn pose_file(&self, mode: u32) -> Option<&Path> {
        let idx = self.poses.iter().position(|p| p.mode == mode)?;
        self.pose_files.get(idx).map(PathBuf::as_path)
    }
}

/// Docks every ligand, at most `concurrency` at a time. Results keep the
/// input order.
#[allow(clippy::too_many_arguments)]
pub async fn dock_ligands(
    receptor: &Receptor,
    site: &BoxCoordinates,
    ligands: &[Ligand],
    spec: &DockingSpec,
    engine: &dyn DockingEngine,
    preparation: &Preparation<'_>,
    output_dir: &Path,
    concurrency: usize,
) -> Result<Vec<DockedLigand>> {
    fs::create_dir_all(output_dir).await?;
    let docked: Vec<DockedLigand> = stream::iter(ligands)
        .map(|ligand| dock_one(receptor, site, ligand, spec, engine, preparation, output_dir))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    write_results_summary(&output_dir.join(RESULTS_SUMMARY_FILE), &docked)?;
    info!(ligands = docked.len(), "Docking complete");
    Ok(docked)
}

async fn dock_one(
    receptor: &Receptor,
    site: &BoxCoordinates,
    ligand: &Ligand,
    spec: &DockingSpec,
    engine: &dyn DockingEngine,
    preparation: &Preparation<'_>,
    output_dir: &Path,
) -> Result<DockedLigand> {
    let stem = format!("CID_{}", ligand.cid);
    let ligand_pdbqt = match preparation {
        Preparation::Convert(obabel) => {
            obabel
                .smiles_to_pdbqt(remove_counterion(ligand.smiles()), &output_dir.join(format!("{}.pdbqt", stem)))
                .await?
        }
        Preparation::Frozen(dir) => frozen_file(dir, &format!("{}.pdbqt", stem))?,
    };

    let job = DockingJob {
        ligand: ligand_pdbqt,
        receptor: receptor.pdbqt.clone(),
        site: *site,
        out: output_dir.join(format!("{}_docking_poses.pdbqt", stem)),
        log: output_dir.join(format!("{}_docking_poses_log.txt", stem)),
        num_poses: spec.num_poses_per_ligand,
        exhaustiveness: spec.exhaustiveness,
        seed: spec.random_seed,
    };
    let log = engine.dock(&job).await?;
    let poses = parse_smina_log(&log)?;

    let models = split_poses(&fs::read_to_string(&job.out).await?);
    if models.len() != poses.len() {
        return Err(LeadOptError::Parse(format!(
            "{} lists {} poses but {:?} holds {}",
            stem,
            poses.len(),
            job.out,
            models.len()
        )));
    }
    let mut pose_files = Vec::with_capacity(models.len());
    for (i, model) in models.iter().enumerate() {
        let path = output_dir.join(format!("{}_docking_poses_{}.pdbqt", stem, i + 1));
        fs::write(&path, model).await?;
        pose_files.push(path);
    }

    let stats = DockingStats::from_poses(&poses)?;
    info!(cid = %ligand.cid, best = stats.binding_affinity_best, poses = poses.len(), "Ligand docked");
    Ok(DockedLigand {
        cid: ligand.cid.clone(),
        drug_score_total: ligand.scores.drug_score_total,
        poses,
        pose_files,
        stats,
    })
}

pub fn write_results_summary(path: &Path, docked: &[DockedLigand]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["CID", "mode", "affinity", "rmsd_lb", "rmsd_ub", "drug_score_total"])?;
    for ligand in docked {
        for pose in &ligand.poses {
            writer.write_record([
                ligand.cid.clone(),
                pose.mode.to_string(),
                pose.affinity.to_string(),
                pose.rmsd_lb.to_string(),
                pose.rmsd_ub.to_string(),
                ligand.drug_score_total.to_string(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

// ── Viewer manifest ──────────────────────────────────────────────────────────

/// What a structure viewer needs to show every pose against the receptor.
#[derive(Debug, Clone, Serialize)]
pub struct PoseManifest {
    pub protein: PathBuf,
    pub poses: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub label: String,
    pub path: PathBuf,
    pub affinity: f64,
}

/// All poses ordered by affinity, then CID, then mode.
pub fn pose_manifest(receptor: &Receptor, docked: &[DockedLigand]) -> PoseManifest {
    let mut rows: Vec<(&str, u32, f64, &Path)> = docked
        .iter()
        .flat_map(|l| {
            l.poses
                .iter()
                .zip(&l.pose_files)
                .map(move |(p, f)| (l.cid.as_str(), p.mode, p.affinity, f.as_path()))
        })
        .collect();
    rows.sort_by(|a, b| {
        a.2.partial_cmp(&b.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
            .then_with(|| a.1.cmp(&b.1))
    });
    PoseManifest {
        protein: receptor.pdb.clone(),
        poses: rows
            .into_iter()
            .map(|(cid, mode, affinity, path)| ManifestEntry {
                label: format!("{} - {}", cid, mode),
                path: path.to_path_buf(),
                affinity,
            })
            .collect(),
    }
}
