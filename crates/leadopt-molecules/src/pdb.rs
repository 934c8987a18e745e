//! PDB structure fetching and fixed-column record parsing.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

use leadopt_common::{HttpFetcher, LeadOptError, Result};

pub const RCSB_DOWNLOAD_URL: &str = "https://files.rcsb.org/download";

/// Client for fetching protein structures from the RCSB PDB.
pub struct StructureFetcher {
    http: HttpFetcher,
    cache_dir: PathBuf,
    base_url: String,
}

impl StructureFetcher {
    /// Create a new StructureFetcher with the given cache directory.
    pub fn new<P: AsRef<Path>>(http: HttpFetcher, cache_dir: P) -> Self {
        Self {
            http,
            cache_dir: cache_dir.as_ref().to_path_buf(),
            base_url: RCSB_DOWNLOAD_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Fetch a PDB file by its ID, reusing the cached copy when present.
    #[instrument(skip(self))]
    pub async fn fetch_pdb(&self, pdb_id: &str) -> Result<PathBuf> {
        let pdb_id = pdb_id.trim();
        if pdb_id.len() != 4 || !pdb_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LeadOptError::Config(format!("`{}` is not a valid PDB code", pdb_id)));
        }
        let file_name = format!("{}.pdb", pdb_id.to_lowercase());
        let file_path = self.cache_dir.join(&file_name);

        if file_path.exists() {
            debug!("PDB {} found in cache", pdb_id);
            return Ok(file_path);
        }

        info!("Fetching PDB {} from RCSB", pdb_id);
        let url = format!("{}/{}", self.base_url, file_name);
        let content = self.http.get_bytes(&url).await?;

        fs::create_dir_all(&self.cache_dir).await?;
        fs::write(&file_path, content).await?;

        Ok(file_path)
    }
}

// ── Coordinate records ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Atom,
    Hetatm,
}

/// One ATOM or HETATM line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomRecord {
    pub kind: RecordKind,
    pub serial: u32,
    pub name: String,
    pub residue_name: String,
    pub chain_id: String,
    pub residue_seq: i32,
    pub coords: [f64; 3],
    pub element: String,
}

fn column(line: &str, range: std::ops::Range<usize>) -> &str {
    let end = range.end.min(line.len());
    line.get(range.start.min(end)..end).unwrap_or("").trim()
}

fn record_name(line: &str) -> &str {
    column(line, 0..6)
}

/// Parses one ATOM/HETATM line; any other record yields `Ok(None)`.
pub fn parse_atom_line(line: &str) -> Result<Option<AtomRecord>> {
    let kind = match record_name(line) {
        "ATOM" => RecordKind::Atom,
        "HETATM" => RecordKind::Hetatm,
        _ => return Ok(None),
    };
    let bad = |field: &str| LeadOptError::Parse(format!("Invalid {} in PDB line `{}`", field, line));
    let coord = |range: std::ops::Range<usize>, field: &str| -> Result<f64> {
        column(line, range).parse::<f64>().map_err(|_| bad(field))
    };

    Ok(Some(AtomRecord {
        kind,
        serial: column(line, 6..11).parse().unwrap_or(0),
        name: column(line, 12..16).to_string(),
        residue_name: column(line, 17..20).to_string(),
        chain_id: column(line, 21..22).to_string(),
        residue_seq: column(line, 22..26).parse().map_err(|_| bad("residue number"))?,
        coords: [coord(30..38, "x")?, coord(38..46, "y")?, coord(46..54, "z")?],
        element: column(line, 76..78).to_string(),
    }))
}

/// All ATOM and HETATM records of the first model, in file order.
pub fn parse_atoms(text: &str) -> Result<Vec<AtomRecord>> {
    let mut atoms = Vec::new();
    for line in text.lines() {
        if record_name(line) == "ENDMDL" {
            break;
        }
        if let Some(atom) = parse_atom_line(line)? {
            atoms.push(atom);
        }
    }
    Ok(atoms)
}

/// The protein part of a structure: ATOM and TER lines, terminated by END.
pub fn extract_protein(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        match record_name(line) {
            "ATOM" | "TER" => {
                out.push_str(line);
                out.push('\n');
            }
            "ENDMDL" => break,
            _ => {}
        }
    }
    out.push_str("END\n");
    out
}

/// HETATM records of the ligand with the given residue name, optionally
/// restricted to one chain.
pub fn ligand_atoms<'a>(atoms: &'a [AtomRecord], ligand_id: &str, chain: Option<&str>) -> Vec<&'a AtomRecord> {
    atoms
        .iter()
        .filter(|a| a.kind == RecordKind::Hetatm && a.residue_name.eq_ignore_ascii_case(ligand_id))
        .filter(|a| chain.map_or(true, |c| a.chain_id == c))
        .collect()
}

// ── Header records ───────────────────────────────────────────────────────────

/// A HET record: a hetero group present in the deposited structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HetGroup {
    pub id: String,
    pub chain: String,
    pub residue_seq: i32,
    pub heavy_atoms: u32,
}

impl HetGroup {
    /// Identifier in the `ID_CHAIN_RESNUM` form used by DoGSiteScorer.
    pub fn site_id(&self) -> String {
        format!("{}_{}_{}", self.id, self.chain, self.residue_seq)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdbHeader {
    pub title: String,
    pub name: String,
    pub chains: Vec<String>,
    pub ligands: Vec<HetGroup>,
}

/// Strips the record name, the continuation number and a trailing `;`.
fn header_payload(line: &str) -> &str {
    let payload = line.get(10..).unwrap_or("").trim();
    payload.strip_suffix(';').unwrap_or(payload).trim()
}

/// Extracts title, molecule names, chains and hetero groups.
pub fn parse_header(text: &str) -> Result<PdbHeader> {
    let mut header = PdbHeader::default();
    let mut names = Vec::new();

    for line in text.lines() {
        match record_name(line) {
            "TITLE" => {
                let fragment = header_payload(line);
                if !fragment.is_empty() {
                    if !header.title.is_empty() {
                        header.title.push(' ');
                    }
                    header.title.push_str(fragment);
                }
            }
            "COMPND" => {
                let payload = header_payload(line);
                if let Some(name) = payload.strip_prefix("MOLECULE:") {
                    names.push(name.trim().to_string());
                } else if let Some(chains) = payload.strip_prefix("CHAIN:") {
                    for chain in chains.split(',').map(str::trim).filter(|c| !c.is_empty()) {
                        if !header.chains.iter().any(|c| c == chain) {
                            header.chains.push(chain.to_string());
                        }
                    }
                }
            }
            "HET" => {
                let bad = || LeadOptError::Parse(format!("Invalid HET record `{}`", line));
                header.ligands.push(HetGroup {
                    id: column(line, 7..10).to_string(),
                    chain: column(line, 12..13).to_string(),
                    residue_seq: column(line, 13..17).parse().map_err(|_| bad())?,
                    heavy_atoms: column(line, 20..25).parse().map_err(|_| bad())?,
                });
            }
            "ATOM" | "HETATM" => break,
            _ => {}
        }
    }
    header.name = names.join(", ");
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadopt_test_utils::SAMPLE_PDB;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_header() {
        let header = parse_header(SAMPLE_PDB).unwrap();
        assert_eq!(header.title, "CRYSTAL STRUCTURE OF EGFR KINASE DOMAIN IN COMPLEX WITH A PYRROLOPYRIMIDINE INHIBITOR");
        assert_eq!(header.name, "EPIDERMAL GROWTH FACTOR RECEPTOR");
        assert_eq!(header.chains, vec!["A".to_string()]);
        assert_eq!(header.ligands.len(), 2);
        assert_eq!(header.ligands[0].site_id(), "W32_A_1101");
        assert_eq!(header.ligands[0].heavy_atoms, 3);
        assert_eq!(header.ligands[1].id, "SO4");
    }

    #[test]
    fn test_parse_atoms_and_ligand_selection() {
        let atoms = parse_atoms(SAMPLE_PDB).unwrap();
        let protein = atoms.iter().filter(|a| a.kind == RecordKind::Atom).count();
        assert_eq!(protein, 7);
        let ligand = ligand_atoms(&atoms, "w32", Some("A"));
        assert_eq!(ligand.len(), 3);
        assert_eq!(ligand[0].coords, [0.0, 0.0, 0.0]);
        assert!(ligand_atoms(&atoms, "W32", Some("B")).is_empty());
    }

    #[test]
    fn test_extract_protein_keeps_only_atoms() {
        let protein = extract_protein(SAMPLE_PDB);
        assert!(protein.lines().all(|l| l.starts_with("ATOM") || l.starts_with("TER") || l == "END"));
        assert!(protein.ends_with("END\n"));
    }

    #[test]
    fn test_malformed_coordinates_fail() {
        let line = "ATOM      1  N   MET A 695      abc     2.000   3.000  1.00 20.00           N";
        assert!(matches!(parse_atom_line(line), Err(LeadOptError::Parse(_))));
        assert_eq!(parse_atom_line("REMARK   2 RESOLUTION.").unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_invalid_pdb_code() {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpFetcher::new(
            leadopt_common::SandboxClient::new().unwrap(),
            leadopt_common::RetryPolicy::immediate(1),
        );
        let fetcher = StructureFetcher::new(http, dir.path());
        assert!(matches!(fetcher.fetch_pdb("not-a-code").await, Err(LeadOptError::Config(_))));
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_fetch_pdb() {
        let dir = tempfile::tempdir().unwrap();
        let http = HttpFetcher::new(
            leadopt_common::SandboxClient::new().unwrap(),
            leadopt_common::RetryPolicy::default(),
        );
        let fetcher = StructureFetcher::new(http, dir.path());

        // Crambin is small
        let path = fetcher.fetch_pdb("1CRN").await.unwrap();
        assert!(path.exists());
    }
}
