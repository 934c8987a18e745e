//! Text fixtures shared by the leadopt test suites.
//!
//! Every fixture is a trimmed-down copy of what the corresponding tool or
//! service produces for the EGFR / 3W32 example.

use std::path::{Path, PathBuf};

/// 3W32 excerpt: chain A (residues 695-697), a one-atom chain B, the W32
/// ligand with three HETATMs spanning (0,0,0)-(10,10,10), a sulfate and a water.
pub const SAMPLE_PDB: &str = include_str!("../fixtures/3w32_sample.pdb");

/// smina stdout for three poses.
pub const SMINA_LOG: &str = include_str!("../fixtures/smina_log.txt");

/// Three-model smina output matching [`SMINA_LOG`].
pub const POSES_PDBQT: &str = include_str!("../fixtures/poses.pdbqt");

/// Receptor prepared for docking.
pub const PROTEIN_PDBQT: &str = include_str!("../fixtures/protein.pdbqt");

/// PLIP `report.xml` with two hydrophobic contacts, one hydrogen bond and one
/// pi-stack.
pub const PLIP_REPORT_XML: &str = include_str!("../fixtures/plip_report.xml");

/// DoGSiteScorer result table with pockets P_0, P_0_0 and P_1.
pub const DOGSITE_TABLE_TSV: &str = include_str!("../fixtures/dogsite_table.tsv");

/// DoGSiteScorer pocket file whose center line reads
/// `16.340 -2.500 42.100`, max radius `9.250`.
pub const POCKET_PDB: &str = include_str!("../fixtures/pocket_P_0_0.pdb");

/// Pocket file with the full DoGSiteScorer header block: the sixth header
/// record holds center `21.114 -4.925 38.771` and max radius `7.600`, and an
/// earlier record mentions a center of mass.
pub const POCKET_HEADER_PDB: &str = include_str!("../fixtures/pocket_P_1_header.pdb");

/// Complete pipeline specification for 3W32 and gefitinib-like analogs.
pub const SPECS_CSV: &str = include_str!("../fixtures/specs_3w32.csv");

/// Four analogs in the `analogs_all.csv` layout.
pub const ANALOGS_CSV: &str = include_str!("../fixtures/analogs_all.csv");

pub const PUBCHEM_PROPERTIES_JSON: &str = include_str!("../fixtures/pubchem_properties.json");

pub fn pubchem_properties() -> serde_json::Value {
    serde_json::from_str(PUBCHEM_PROPERTIES_JSON).expect("fixture is valid JSON")
}

/// Writes `content` to `dir/name` and returns the path.
pub fn write_fixture(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture dir");
    }
    std::fs::write(&path, content).expect("write fixture");
    path
}

/// Routes test logs through the test harness; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("leadopt_molecules=debug")),
        )
        .with_test_writer()
        .try_init();
}
