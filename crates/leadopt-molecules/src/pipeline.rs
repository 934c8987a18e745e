//! Orchestrator for the lead-optimization pipeline.
//!
//! Stages run strictly in order; each one receives what the previous ones
//! returned and writes only into its own output folder.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use leadopt_common::{LeadOptError, Result};

use crate::binding_site::BindingSite;
use crate::docking::{self, DockedLigand, DockingEngine, Preparation};
use crate::dogsitescorer::DogSiteClient;
use crate::druglikeness::DrugScores;
use crate::interactions::{self, InteractionAnalysis, InteractionProfiler};
use crate::ligand::Ligand;
use crate::obabel::ObabelRunner;
use crate::output::OutputPaths;
use crate::pdb::StructureFetcher;
use crate::protein::Protein;
use crate::pubchem::PubChemClient;
use crate::selection::{self, Comparison, LigandMetrics};
use crate::similarity;
use crate::specs::Specs;

pub const POSES_MANIFEST_FILE: &str = "poses.json";
pub const PIPELINE_REPORT_FILE: &str = "pipeline_report.json";

/// Previously computed inputs that replace the expensive external steps.
#[derive(Debug, Clone, Default)]
pub struct FrozenData {
    /// An `analogs_all.csv` from an earlier run.
    pub similarity_search: Option<PathBuf>,
    /// Folder with the receptor and `CID_<cid>.pdbqt` ligand files.
    pub docking_pdbqt_files: Option<PathBuf>,
}

/// Clients and tool wrappers the stages call out to.
pub struct LeadOptimizationPipeline {
    pub structures: StructureFetcher,
    pub pubchem: PubChemClient,
    pub dogsite: DogSiteClient,
    pub obabel: ObabelRunner,
    pub docking_engine: Arc<dyn DockingEngine>,
    pub profiler: Arc<dyn InteractionProfiler>,
    /// Ligands docked (and poses profiled) at the same time.
    pub concurrency: usize,
}

// ── Report ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ProteinSummary {
    pub pdb_code: String,
    pub name: String,
    pub chains: Vec<String>,
    pub residue_number_first: i32,
    pub residue_number_last: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LigandSummary {
    pub cid: String,
    pub name: Option<String>,
    pub smiles: String,
    pub similarity: Option<f64>,
    pub scores: DrugScores,
    pub binding_affinity_best: Option<f64>,
    pub num_total_interactions_highest: Option<u32>,
}

impl LigandSummary {
    fn new(ligand: &Ligand, docked: &[DockedLigand], analysis: &InteractionAnalysis) -> Self {
        LigandSummary {
            cid: ligand.cid.clone(),
            name: ligand.record.name.clone(),
            smiles: ligand.smiles().to_string(),
            similarity: ligand.similarity,
            scores: ligand.scores,
            binding_affinity_best: docked
                .iter()
                .find(|d| d.cid == ligand.cid)
                .map(|d| d.stats.binding_affinity_best),
            num_total_interactions_highest: analysis.summary(&ligand.cid).map(|s| s.num_total_interactions_highest),
        }
    }
}

/// Everything a run decided, written to `pipeline_report.json`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    pub protein: ProteinSummary,
    pub binding_site: BindingSite,
    pub reference: LigandSummary,
    pub analogs: Vec<LigandSummary>,
    pub num_poses: usize,
    pub optimized_cids: Vec<String>,
    pub comparison: Comparison,
}

// ── Run ──────────────────────────────────────────────────────────────────────

impl LeadOptimizationPipeline {
    pub async fn run(
        &self,
        project_name: &str,
        specs: &Specs,
        output_root: &Path,
        frozen: &FrozenData,
    ) -> Result<PipelineReport> {
        let paths = OutputPaths::new(output_root, project_name);
        paths.create().await?;
        info!(project = project_name, output = %paths.project.display(), "Output folders ready");

        let protein = Protein::load(&specs.protein, &self.structures, &paths.protein).await?;
        info!(
            pdb_code = %protein.pdb_code,
            residues = protein.residues_length,
            "Stage complete: protein"
        );

        let reference = Ligand::resolve(&specs.ligand, &self.pubchem).await?;
        reference
            .property_table()
            .write_csv(&paths.ligand.join(format!("CID_{}.csv", reference.cid)))?;
        info!(
            cid = %reference.cid,
            drug_score_total = reference.scores.drug_score_total,
            "Stage complete: ligand"
        );

        self.optimize(project_name, specs, &protein, &reference, output_root, frozen).await
    }

    /// The stages after protein and ligand resolution, for callers that
    /// already hold both.
    pub async fn optimize(
        &self,
        project_name: &str,
        specs: &Specs,
        protein: &Protein,
        reference: &Ligand,
        output_root: &Path,
        frozen: &FrozenData,
    ) -> Result<PipelineReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, project = project_name, "Optimizing ligand {}", reference.cid);
        let paths = OutputPaths::new(output_root, project_name);
        paths.create().await?;

        let site = BindingSite::define(&specs.binding_site, protein, &self.dogsite, &paths.binding_site).await?;
        info!(center = ?site.center(), size = ?site.size(), "Stage complete: binding site");

        let analogs = similarity::run(
            reference,
            &specs.similarity_search,
            &self.pubchem,
            &paths.similarity_search,
            frozen.similarity_search.as_deref(),
        )
        .await?;
        if analogs.is_empty() {
            return Err(LeadOptError::remote("pubchem", "Similarity search returned no analogs"));
        }
        info!(analogs = analogs.len(), "Stage complete: similarity search");

        let preparation = match &frozen.docking_pdbqt_files {
            Some(dir) => Preparation::Frozen(dir.clone()),
            None => Preparation::Convert(&self.obabel),
        };
        let receptor = docking::prepare_receptor(protein, &preparation, &paths.docking).await?;
        let engine = self.docking_engine.as_ref();
        let docked = docking::dock_ligands(
            &receptor,
            &site.coordinates,
            &analogs,
            &specs.docking,
            engine,
            &preparation,
            &paths.docking,
            self.concurrency,
        )
        .await?;
        let reference_docked = docking::dock_ligands(
            &receptor,
            &site.coordinates,
            std::slice::from_ref(reference),
            &specs.docking,
            engine,
            &preparation,
            &paths.ligand,
            1,
        )
        .await?;
        let manifest = docking::pose_manifest(&receptor, &docked);
        fs::write(
            paths.visualizations.join(POSES_MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )
        .await?;
        info!(poses = manifest.poses.len(), "Stage complete: docking");

        let profiler = self.profiler.as_ref();
        let first = protein.residue_number_first;
        let analysis = interactions::analyze(
            &receptor,
            first,
            &docked,
            profiler,
            &paths.interaction_analysis,
            self.concurrency,
        )
        .await?;
        let reference_analysis = interactions::analyze(&receptor, first, &reference_docked, profiler, &paths.ligand, 1).await?;
        info!(poses = analysis.poses.len(), "Stage complete: interaction analysis");

        write_full_property_table(reference, &reference_docked, &reference_analysis, &paths.ligand)?;
        for analog in &analogs {
            write_full_property_table(analog, &docked, &analysis, &paths.similarity_search)?;
        }

        let rows = selection::merge_pose_rows(&analysis.rows(), &analogs)?;
        let reference_rows = selection::merge_pose_rows(&reference_analysis.rows(), std::slice::from_ref(reference))?;
        let baseline = LigandMetrics::from_rows(&reference.cid, &reference_rows)
            .ok_or_else(|| LeadOptError::Parse(format!("Reference ligand {} produced no poses", reference.cid)))?;
        let num_poses = rows.len();
        let optimized = selection::select(baseline, rows, &specs.optimized_ligands)?;
        optimized.write_json(&paths.optimized_ligands).await?;
        for cid in &optimized.optimized_cids {
            if let Some(analog) = analogs.iter().find(|a| &a.cid == cid) {
                write_full_property_table(analog, &docked, &analysis, &paths.optimized_ligands)?;
            }
        }
        info!(
            selected = ?optimized.optimized_cids,
            reference_affinity = optimized.reference.binding_affinity_best,
            best_affinity = ?optimized.comparison.best_analog.as_ref().map(|b| b.binding_affinity_best),
            "Stage complete: optimized ligands"
        );

        let report = PipelineReport {
            run_id,
            project: project_name.to_string(),
            started_at,
            finished_at: Utc::now(),
            output_dir: paths.project.clone(),
            protein: ProteinSummary {
                pdb_code: protein.pdb_code.clone(),
                name: protein.name.clone(),
                chains: protein.chains.clone(),
                residue_number_first: protein.residue_number_first,
                residue_number_last: protein.residue_number_last,
            },
            binding_site: site,
            reference: LigandSummary::new(reference, &reference_docked, &reference_analysis),
            analogs: analogs.iter().map(|a| LigandSummary::new(a, &docked, &analysis)).collect(),
            num_poses,
            optimized_cids: optimized.optimized_cids.clone(),
            comparison: optimized.comparison.clone(),
        };
        fs::write(
            paths.project.join(PIPELINE_REPORT_FILE),
            serde_json::to_string_pretty(&report)?,
        )
        .await?;
        info!(%run_id, "Pipeline finished");
        Ok(report)
    }
}

/// Identifier, score, docking and interaction rows in one `CID_<cid>.csv`.
fn write_full_property_table(
    ligand: &Ligand,
    docked: &[DockedLigand],
    analysis: &InteractionAnalysis,
    dir: &Path,
) -> Result<()> {
    let mut table = ligand.property_table();
    if let Some(d) = docked.iter().find(|d| d.cid == ligand.cid) {
        table.extend(d.stats.property_table());
    }
    if let Some(summary) = analysis.summary(&ligand.cid) {
        table.extend(summary.property_table());
    }
    table.write_csv(&dir.join(format!("CID_{}.csv", ligand.cid)))
}
