//! The target protein: structure file, header metadata and residue range.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use leadopt_common::{LeadOptError, Result};

use crate::pdb::{parse_atoms, parse_header, AtomRecord, HetGroup, RecordKind, StructureFetcher};
use crate::specs::{ProteinInputType, ProteinSpec};

#[derive(Debug, Clone, Serialize)]
pub struct Protein {
    pub input_type: ProteinInputType,
    pub pdb_code: String,
    /// The project copy of the structure file.
    pub pdb_path: PathBuf,
    pub title: String,
    pub name: String,
    pub chains: Vec<String>,
    pub ligands: Vec<HetGroup>,
    pub residue_number_first: i32,
    pub residue_number_last: i32,
    pub residues_length: i32,
    #[serde(skip)]
    atoms: Vec<AtomRecord>,
    #[serde(skip)]
    content: String,
}

impl Protein {
    /// Fetches or copies the structure into `output_dir` and parses it.
    pub async fn load(spec: &ProteinSpec, fetcher: &StructureFetcher, output_dir: &Path) -> Result<Self> {
        let (pdb_code, source) = match spec.input_type {
            ProteinInputType::PdbCode => {
                let code = spec.input_value.trim().to_string();
                let cached = fetcher.fetch_pdb(&code).await?;
                (code, cached)
            }
            ProteinInputType::PdbFilepath => {
                let path = PathBuf::from(spec.input_value.trim());
                if !path.is_file() {
                    return Err(LeadOptError::Config(format!(
                        "Protein file {} does not exist",
                        path.display()
                    )));
                }
                let code = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .ok_or_else(|| LeadOptError::Config(format!("Invalid protein path {}", path.display())))?;
                (code, path)
            }
        };

        fs::create_dir_all(output_dir).await?;
        let pdb_path = output_dir.join(format!("{}.pdb", pdb_code));
        if source != pdb_path {
            fs::copy(&source, &pdb_path).await?;
        }
        let content = fs::read_to_string(&pdb_path).await?;
        let protein = Self::from_pdb_text(spec.input_type, &pdb_code, pdb_path, content)?;
        info!(
            pdb_code = %protein.pdb_code,
            name = %protein.name,
            chains = ?protein.chains,
            ligands = protein.ligands.len(),
            "Protein loaded"
        );
        Ok(protein)
    }

    pub fn from_pdb_text(
        input_type: ProteinInputType,
        pdb_code: &str,
        pdb_path: PathBuf,
        content: String,
    ) -> Result<Self> {
        let header = parse_header(&content)?;
        let atoms = parse_atoms(&content)?;
        let (first, last) = longest_chain_range(&atoms)?;

        Ok(Protein {
            input_type,
            pdb_code: pdb_code.to_string(),
            pdb_path,
            title: header.title,
            name: header.name,
            chains: header.chains,
            ligands: header.ligands,
            residue_number_first: first,
            residue_number_last: last,
            residues_length: last - first + 1,
            atoms,
            content,
        })
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn atoms(&self) -> &[AtomRecord] {
        &self.atoms
    }

    /// The co-crystallized ligand with the most heavy atoms; the first wins ties.
    pub fn heaviest_ligand(&self) -> Option<&HetGroup> {
        self.ligands
            .iter()
            .fold(None, |best: Option<&HetGroup>, l| match best {
                Some(b) if b.heavy_atoms >= l.heavy_atoms => Some(b),
                _ => Some(l),
            })
    }
}

/// First and last residue number of the chain with the most ATOM records.
/// Chains are visited in sorted order, so the alphabetically first wins ties.
fn longest_chain_range(atoms: &[AtomRecord]) -> Result<(i32, i32)> {
    let mut per_chain: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for atom in atoms.iter().filter(|a| a.kind == RecordKind::Atom) {
        per_chain.entry(atom.chain_id.as_str()).or_default().push(atom.residue_seq);
    }

    let mut longest: Option<&Vec<i32>> = None;
    for residues in per_chain.values() {
        if longest.map_or(true, |l| residues.len() > l.len()) {
            longest = Some(residues);
        }
    }
    match longest.and_then(|r| Some((*r.first()?, *r.last()?))) {
        Some(range) => Ok(range),
        None => Err(LeadOptError::Parse("Structure contains no ATOM records".into())),
    }
}
