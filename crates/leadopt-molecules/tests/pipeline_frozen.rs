//! End-to-end run on frozen similarity and docking inputs, with stand-ins for
//! smina and PLIP.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use leadopt_common::{HttpFetcher, PollPolicy, RetryPolicy, SandboxClient};
use leadopt_molecules::docking::{DockingEngine, DockingJob};
use leadopt_molecules::dogsitescorer::DogSiteClient;
use leadopt_molecules::interactions::{Combinator, InteractionProfiler};
use leadopt_molecules::ligand::Ligand;
use leadopt_molecules::obabel::ObabelRunner;
use leadopt_molecules::pdb::StructureFetcher;
use leadopt_molecules::pipeline::{FrozenData, LeadOptimizationPipeline};
use leadopt_molecules::protein::Protein;
use leadopt_molecules::pubchem::PubChemClient;
use leadopt_molecules::similarity::read_analogs_csv;
use leadopt_molecules::specs::{BindingSiteSpec, BoxCoordinates, ProteinInputType, Specs};
use leadopt_molecules::Result;
use leadopt_test_utils::{
    init_test_logging, write_fixture, ANALOGS_CSV, PLIP_REPORT_XML, POSES_PDBQT, PROTEIN_PDBQT, SAMPLE_PDB,
    SPECS_CSV,
};

/// Writes the three fixture poses and reports affinities shifted per CID.
struct ScriptedSmina;

fn affinity_offset(cid: &str) -> f64 {
    match cid {
        "5291" => -1.0,
        "10184653" => -0.5,
        "176870" => -0.2,
        _ => 0.0,
    }
}

#[async_trait]
impl DockingEngine for ScriptedSmina {
    async fn dock(&self, job: &DockingJob) -> Result<String> {
        assert!(job.ligand.exists(), "ligand input {:?} missing", job.ligand);
        assert_eq!(job.seed, Some(1111));
        let cid = job
            .ligand
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix("CID_"))
            .unwrap()
            .to_string();
        tokio::fs::write(&job.out, POSES_PDBQT).await?;

        let off = affinity_offset(&cid);
        Ok(format!(
            "mode |   affinity | dist from best mode\n\
             -----+------------+----------+----------\n\
             1       {:.1}       0.000      0.000\n\
             2       {:.1}       1.712      2.385\n\
             3       {:.1}       2.021      6.550\n\
             Refine time 1.0\n",
            -9.8 + off,
            -9.1 + off,
            -8.7 + off
        ))
    }
}

struct FixturePlip;

#[async_trait]
impl InteractionProfiler for FixturePlip {
    async fn profile(&self, complex: &Path, _output_dir: &Path) -> Result<String> {
        let text = tokio::fs::read_to_string(complex).await?;
        assert!(text.contains("COMPND"));
        Ok(PLIP_REPORT_XML.to_string())
    }
}

fn pipeline(cache: PathBuf) -> LeadOptimizationPipeline {
    let http = || HttpFetcher::new(SandboxClient::new().unwrap(), RetryPolicy::immediate(1));
    LeadOptimizationPipeline {
        structures: StructureFetcher::new(http(), cache),
        pubchem: PubChemClient::new(http(), PollPolicy::new(1, 0.0)),
        dogsite: DogSiteClient::new(http(), PollPolicy::new(1, 0.0)),
        obabel: ObabelRunner::new("obabel"),
        docking_engine: Arc::new(ScriptedSmina),
        profiler: Arc::new(FixturePlip),
        concurrency: 2,
    }
}

#[tokio::test]
async fn test_frozen_run_selects_strongest_binder() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();

    let mut specs = Specs::from_csv_str(SPECS_CSV).unwrap();
    specs.binding_site = BindingSiteSpec::Coordinates(BoxCoordinates {
        center: [5.0, 5.0, 5.0],
        size: [15.0, 15.0, 15.0],
    });
    specs.optimized_ligands.num_results = 2;

    let frozen_similarity = write_fixture(dir.path(), "frozen/analogs_all.csv", ANALOGS_CSV);
    let frozen_docking = dir.path().join("frozen/pdbqt");
    write_fixture(&frozen_docking, "3w32_extracted_protein_ready_for_docking.pdbqt", PROTEIN_PDBQT);
    let records = read_analogs_csv(&frozen_similarity).unwrap();
    for record in &records {
        write_fixture(&frozen_docking, &format!("CID_{}.pdbqt", record.cid), "ROOT\nENDROOT\n");
    }

    let mut reference: Ligand = records
        .iter()
        .find(|r| r.cid == "123631")
        .cloned()
        .unwrap()
        .into_ligand();
    reference.similarity = None;
    let protein = Protein::from_pdb_text(
        ProteinInputType::PdbCode,
        "3w32",
        dir.path().join("3w32.pdb"),
        SAMPLE_PDB.to_string(),
    )
    .unwrap();

    let frozen = FrozenData {
        similarity_search: Some(frozen_similarity),
        docking_pdbqt_files: Some(frozen_docking),
    };
    let out = dir.path().join("out");
    let report = pipeline(dir.path().join("cache"))
        .optimize("EGFR", &specs, &protein, &reference, &out, &frozen)
        .await
        .unwrap();

    // three most drug-like analogs, each docked with three poses
    assert_eq!(report.analogs.len(), 3);
    assert_eq!(report.num_poses, 9);
    let expected_top = report
        .analogs
        .iter()
        .min_by(|a, b| affinity_offset(&a.cid).partial_cmp(&affinity_offset(&b.cid)).unwrap())
        .unwrap()
        .cid
        .clone();
    assert_eq!(report.optimized_cids.first(), Some(&expected_top));
    assert!(report.optimized_cids.len() <= 2);
    assert_eq!(report.comparison.reference.binding_affinity_best, -9.8);
    assert_eq!(report.comparison.reference.num_total_interactions_highest, 4);

    let project = out.join("EGFR");
    for file in [
        "pipeline_report.json",
        "4_Ligand Similarity Search/analogs_all.csv",
        "5_Docking/Results_Summary.csv",
        "5_Docking/3w32_extracted_protein.pdb",
        "6_Interaction Analysis/interaction_results.csv",
        "7_Visualizations/poses.json",
        "8_Optimized Ligands/optimized_ligands.json",
        "2_Ligand/CID_123631.csv",
        "2_Ligand/CID_123631_docking_poses_1.pdbqt",
    ] {
        assert!(project.join(file).is_file(), "{} was not written", file);
    }

    let ligand_table = std::fs::read_to_string(project.join("2_Ligand/CID_123631.csv")).unwrap();
    assert!(ligand_table.contains("binding_affinity_best,-9.8"));
    assert!(ligand_table.contains("num_total_interactions_highest,4"));

    // residue numbers are shifted onto the 3W32 numbering (first residue 695)
    let poses = leadopt_molecules::interactions::load_pose_interactions(
        &project.join("6_Interaction Analysis/interaction_results.csv"),
    )
    .unwrap();
    let hits = leadopt_molecules::interactions::find_poses(
        &poses,
        &["h_bond:774".parse().unwrap(), "pi_stacking:834".parse().unwrap()],
        Combinator::All,
    );
    assert_eq!(hits.len(), 9);
}
