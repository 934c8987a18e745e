//! Binding-site definition: explicit coordinates, the box around a
//! co-crystallized ligand, or the best pocket found by DoGSiteScorer.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

use leadopt_common::{LeadOptError, Result};

use crate::dogsitescorer::{parse_pocket_box, pocket_pdb_path, DogSiteClient, Pocket};
use crate::pdb::ligand_atoms;
use crate::protein::Protein;
use crate::selection::rank_rows;
use crate::specs::{BindingSiteSpec, BoxCoordinates, DetectionSpec, ProteinInputType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionMethod {
    Coordinates,
    Ligand,
    Detection,
}

/// The search box handed to docking, with how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BindingSite {
    pub definition_method: DefinitionMethod,
    pub coordinates: BoxCoordinates,
    /// Selected DoGSiteScorer pocket.
    pub pocket_name: Option<String>,
    pub ligand_id: Option<String>,
    pub chain_id: Option<String>,
}

impl BindingSite {
    pub fn center(&self) -> [f64; 3] {
        self.coordinates.center
    }

    pub fn size(&self) -> [f64; 3] {
        self.coordinates.size
    }

    /// Runs the configured strategy. Artifacts land in `output_dir`.
    pub async fn define(
        spec: &BindingSiteSpec,
        protein: &Protein,
        dogsite: &DogSiteClient,
        output_dir: &Path,
    ) -> Result<Self> {
        fs::create_dir_all(output_dir).await?;
        let site = match spec {
            BindingSiteSpec::Coordinates(coordinates) => BindingSite {
                definition_method: DefinitionMethod::Coordinates,
                coordinates: *coordinates,
                pocket_name: None,
                ligand_id: None,
                chain_id: None,
            },
            BindingSiteSpec::Ligand { ligand_id } => {
                let site = Self::from_ligand(protein, ligand_id)?;
                let lines = ligand_lines(protein.content(), &site);
                fs::write(output_dir.join(format!("{}.pdb", ligand_id)), lines).await?;
                site
            }
            BindingSiteSpec::Detection(detection) => Self::detect(detection, protein, dogsite, output_dir).await?,
        };

        fs::write(output_dir.join("binding_site.json"), serde_json::to_vec_pretty(&site)?).await?;
        info!(
            method = ?site.definition_method,
            center = ?site.coordinates.center,
            size = ?site.coordinates.size,
            "Binding site defined"
        );
        Ok(site)
    }

    /// Box around the ligand's atoms: the extent's midpoint, padded by 5 Å.
    /// `ligand_id` is a residue name, optionally in `ID_CHAIN_RESNUM` form.
    pub fn from_ligand(protein: &Protein, ligand_id: &str) -> Result<Self> {
        let mut parts = ligand_id.split('_');
        let residue_name = parts.next().unwrap_or_default();
        let chain = parts.next().filter(|c| !c.is_empty());

        let atoms = ligand_atoms(protein.atoms(), residue_name, chain);
        if atoms.is_empty() {
            return Err(LeadOptError::Config(format!(
                "Ligand `{}` not found in {}; available: {}",
                ligand_id,
                protein.pdb_code,
                available_ligands(protein)
            )));
        }

        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for atom in &atoms {
            for axis in 0..3 {
                min[axis] = min[axis].min(atom.coords[axis]);
                max[axis] = max[axis].max(atom.coords[axis]);
            }
        }
        let center = [0usize, 1, 2].map(|i| (max[i] + min[i]) / 2.0);
        let size = [0usize, 1, 2].map(|i| max[i] - min[i] + 5.0);

        Ok(BindingSite {
            definition_method: DefinitionMethod::Ligand,
            coordinates: BoxCoordinates { center, size },
            pocket_name: None,
            ligand_id: Some(residue_name.to_string()),
            chain_id: chain.map(String::from),
        })
    }

    async fn detect(
        spec: &DetectionSpec,
        protein: &Protein,
        dogsite: &DogSiteClient,
        output_dir: &Path,
    ) -> Result<Self> {
        let (ligand_id, chain_id) = resolve_detection_target(protein, spec)?;
        let pdb_id = match protein.input_type {
            ProteinInputType::PdbCode => protein.pdb_code.clone(),
            ProteinInputType::PdbFilepath => dogsite.upload_pdb_file(&protein.pdb_path).await?,
        };

        let pockets = dogsite.submit_job(&pdb_id, &ligand_id, &chain_id).await?;
        write_pocket_table(&pockets, &output_dir.join("binding_sites.csv"))?;
        dogsite.download_pocket_files(&pockets, output_dir).await?;

        let best = select_best_pocket(&pockets, &spec.selection)?;
        let pocket_text = fs::read_to_string(pocket_pdb_path(output_dir, &best.name)).await?;
        let coordinates = parse_pocket_box(&pocket_text)?;
        info!(pocket = %best.name, "Best pocket selected");

        Ok(BindingSite {
            definition_method: DefinitionMethod::Detection,
            coordinates,
            pocket_name: Some(best.name.clone()),
            ligand_id: Some(ligand_id).filter(|l| !l.is_empty()),
            chain_id: Some(chain_id).filter(|c| !c.is_empty()),
        })
    }
}

fn available_ligands(protein: &Protein) -> String {
    let ids: BTreeSet<&str> = protein.ligands.iter().map(|l| l.id.as_str()).collect();
    ids.into_iter().collect::<Vec<_>>().join(", ")
}

/// The HETATM lines of the ligand a site was built from.
fn ligand_lines(content: &str, site: &BindingSite) -> String {
    let mut out = String::new();
    for line in content.lines().filter(|l| l.starts_with("HETATM")) {
        let residue = line.get(17..20).unwrap_or("").trim();
        let chain = line.get(21..22).unwrap_or("").trim();
        let residue_matches = site.ligand_id.as_deref().is_some_and(|id| residue.eq_ignore_ascii_case(id));
        let chain_matches = site.chain_id.as_deref().map_or(true, |c| c == chain);
        if residue_matches && chain_matches {
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str("END\n");
    out
}

/// Resolves the DoGSiteScorer ligand id (`ID_CHAIN_RESNUM`) and chain.
///
/// A configured chain must exist; otherwise the first chain is used. A fully
/// qualified ligand id also fixes the chain. A bare residue name is matched
/// against the chosen chain. Without a ligand id the heaviest ligand is used.
pub fn resolve_detection_target(protein: &Protein, spec: &DetectionSpec) -> Result<(String, String)> {
    let mut chain_id = match &spec.protein_chain_id {
        Some(chain) => {
            if !protein.chains.iter().any(|c| c == chain) {
                return Err(LeadOptError::Config(format!(
                    "Chain `{}` does not exist in {}; available chains: {}",
                    chain,
                    protein.pdb_code,
                    protein.chains.join(", ")
                )));
            }
            chain.clone()
        }
        None => protein.chains.first().cloned().unwrap_or_default(),
    };

    let site_ids: Vec<String> = protein.ligands.iter().map(|l| l.site_id()).collect();
    let ligand_id = match &spec.protein_ligand_id {
        Some(id) if id.contains('_') => {
            if !site_ids.contains(id) {
                return Err(LeadOptError::Config(format!(
                    "Ligand `{}` does not exist in {}; available: {}",
                    id,
                    protein.pdb_code,
                    site_ids.join(", ")
                )));
            }
            chain_id = id.split('_').nth(1).unwrap_or_default().to_string();
            id.clone()
        }
        Some(id) => protein
            .ligands
            .iter()
            .find(|l| &l.id == id && l.chain == chain_id)
            .map(|l| l.site_id())
            .ok_or_else(|| {
                LeadOptError::Config(format!(
                    "Ligand `{}` does not exist on chain `{}` of {}; available: {}",
                    id,
                    chain_id,
                    protein.pdb_code,
                    available_ligands(protein)
                ))
            })?,
        None => match protein.heaviest_ligand() {
            Some(l) => l.site_id(),
            None => {
                warn!(pdb_code = %protein.pdb_code, "No co-crystallized ligand; ligand coverage will be empty");
                String::new()
            }
        },
    };
    Ok((ligand_id, chain_id))
}

/// First pocket after ranking; ties keep the service's row order.
pub fn select_best_pocket<'a>(pockets: &'a [Pocket], selection: &crate::specs::Selection) -> Result<&'a Pocket> {
    let order = rank_rows(pockets, selection)?;
    order
        .first()
        .map(|&i| &pockets[i])
        .ok_or_else(|| LeadOptError::remote("dogsitescorer", "No pockets detected"))
}

fn write_pocket_table(pockets: &[Pocket], path: &Path) -> Result<()> {
    let columns: BTreeSet<&str> = pockets.iter().flat_map(|p| p.values.keys().map(String::as_str)).collect();
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(std::iter::once("name").chain(columns.iter().copied()))?;
    for pocket in pockets {
        let mut row = vec![pocket.name.clone()];
        row.extend(columns.iter().map(|c| pocket.values.get(*c).map(|v| v.to_string()).unwrap_or_default()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dogsitescorer::parse_pocket_table;
    use crate::expr::ScoreExpr;
    use crate::specs::{DetectionMethod, Selection, DEFAULT_POCKET_FUNCTION, POCKET_CRITERIA};
    use leadopt_test_utils::{DOGSITE_TABLE_TSV, SAMPLE_PDB};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn protein() -> Protein {
        Protein::from_pdb_text(ProteinInputType::PdbCode, "3w32", PathBuf::from("3w32.pdb"), SAMPLE_PDB.to_string())
            .unwrap()
    }

    fn detection(chain: Option<&str>, ligand: Option<&str>) -> DetectionSpec {
        DetectionSpec {
            method: DetectionMethod::DogSiteScorer,
            protein_chain_id: chain.map(String::from),
            protein_ligand_id: ligand.map(String::from),
            selection: Selection::Sorting(vec!["lig_cov".into(), "poc_cov".into()]),
        }
    }

    #[test]
    fn test_ligand_box() {
        let site = BindingSite::from_ligand(&protein(), "W32").unwrap();
        assert_eq!(site.center(), [5.0, 5.0, 5.0]);
        assert_eq!(site.size(), [15.0, 15.0, 15.0]);
        assert_eq!(site.definition_method, DefinitionMethod::Ligand);
    }

    #[test]
    fn test_ligand_box_unknown_ligand() {
        assert!(matches!(BindingSite::from_ligand(&protein(), "XYZ"), Err(LeadOptError::Config(_))));
        assert!(matches!(BindingSite::from_ligand(&protein(), "W32_B_1101"), Err(LeadOptError::Config(_))));
    }

    #[test]
    fn test_ligand_lines_written_for_site() {
        let site = BindingSite::from_ligand(&protein(), "W32_A").unwrap();
        let lines = ligand_lines(SAMPLE_PDB, &site);
        assert_eq!(lines.lines().filter(|l| l.starts_with("HETATM")).count(), 3);
    }

    #[test]
    fn test_resolve_target_defaults_to_heaviest_ligand() {
        let (ligand, chain) = resolve_detection_target(&protein(), &detection(None, None)).unwrap();
        assert_eq!(ligand, "SO4_A_1201");
        assert_eq!(chain, "A");
    }

    #[test]
    fn test_resolve_target_by_name_and_qualified_id() {
        let (ligand, chain) = resolve_detection_target(&protein(), &detection(Some("A"), Some("W32"))).unwrap();
        assert_eq!((ligand.as_str(), chain.as_str()), ("W32_A_1101", "A"));

        let (ligand, chain) = resolve_detection_target(&protein(), &detection(None, Some("W32_A_1101"))).unwrap();
        assert_eq!((ligand.as_str(), chain.as_str()), ("W32_A_1101", "A"));
    }

    #[test]
    fn test_resolve_target_rejects_unknown_ids() {
        for (chain, ligand) in [(Some("B"), None), (None, Some("W32_A_9999")), (None, Some("ATP"))] {
            let result = resolve_detection_target(&protein(), &detection(chain, ligand));
            assert!(matches!(result, Err(LeadOptError::Config(_))), "{:?} {:?}", chain, ligand);
        }
    }

    #[test]
    fn test_select_best_pocket() {
        let pockets = parse_pocket_table(DOGSITE_TABLE_TSV).unwrap();
        let sorting = Selection::Sorting(vec!["lig_cov".into(), "poc_cov".into()]);
        assert_eq!(select_best_pocket(&pockets, &sorting).unwrap().name, "P_0_0");

        let function = Selection::Function(ScoreExpr::parse_with_columns(DEFAULT_POCKET_FUNCTION, POCKET_CRITERIA).unwrap());
        assert_eq!(select_best_pocket(&pockets, &function).unwrap().name, "P_1");

        assert!(select_best_pocket(&[], &sorting).is_err());
    }

    #[tokio::test]
    async fn test_define_by_coordinates_writes_summary() {
        use leadopt_common::{HttpFetcher, PollPolicy, RetryPolicy, SandboxClient};
        let dir = tempfile::tempdir().unwrap();
        let http = HttpFetcher::new(SandboxClient::new().unwrap(), RetryPolicy::immediate(1));
        let dogsite = DogSiteClient::new(http, PollPolicy::new(1, 0.0));
        let spec = BindingSiteSpec::Coordinates(BoxCoordinates { center: [1.0, 2.0, 3.0], size: [20.0; 3] });

        let site = BindingSite::define(&spec, &protein(), &dogsite, dir.path()).await.unwrap();
        assert_eq!(site.center(), [1.0, 2.0, 3.0]);
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("binding_site.json")).unwrap()).unwrap();
        assert_eq!(json["definition_method"], "coordinates");
    }
}
