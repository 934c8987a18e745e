//! Ligand similarity search: collect analogs of the reference ligand, score
//! them and keep the most drug-like ones.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, info, warn};

use leadopt_common::{LeadOptError, Result};

use crate::druglikeness::Descriptors;
use crate::ligand::{CompoundRecord, Ligand};
use crate::pubchem::PubChemClient;
use crate::specs::{SearchEngine, SimilaritySearchSpec};

pub const ANALOGS_ALL_FILE: &str = "analogs_all.csv";

/// One row of `analogs_all.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalogRecord {
    pub cid: String,
    pub name: Option<String>,
    pub iupac_name: Option<String>,
    pub smiles: String,
    pub inchi: Option<String>,
    pub inchikey: Option<String>,
    pub mol_weight: f64,
    pub num_h_acceptors: u32,
    pub num_h_donors: u32,
    pub logp: f64,
    pub tpsa: f64,
    pub num_rot_bonds: u32,
    pub similarity: f64,
    #[serde(default)]
    pub drug_score_lipinski: f64,
    #[serde(default)]
    pub drug_score_qed: f64,
    #[serde(default)]
    pub drug_score_custom: f64,
    #[serde(default)]
    pub drug_score_total: f64,
}

impl AnalogRecord {
    pub fn from_ligand(ligand: &Ligand) -> Self {
        let r = &ligand.record;
        let d = &r.descriptors;
        AnalogRecord {
            cid: r.cid.clone(),
            name: r.name.clone(),
            iupac_name: r.iupac_name.clone(),
            smiles: r.smiles.clone(),
            inchi: r.inchi.clone(),
            inchikey: r.inchikey.clone(),
            mol_weight: d.mol_weight,
            num_h_acceptors: d.num_h_acceptors,
            num_h_donors: d.num_h_donors,
            logp: d.logp,
            tpsa: d.tpsa,
            num_rot_bonds: d.num_rot_bonds,
            similarity: ligand.similarity.unwrap_or(1.0),
            drug_score_lipinski: ligand.scores.drug_score_lipinski,
            drug_score_qed: ligand.scores.drug_score_qed,
            drug_score_custom: ligand.scores.drug_score_custom,
            drug_score_total: ligand.scores.drug_score_total,
        }
    }

    /// Rebuilds the ligand; scores are recomputed from the descriptors.
    pub fn into_ligand(self) -> Ligand {
        let record = CompoundRecord {
            cid: self.cid,
            name: self.name,
            iupac_name: self.iupac_name,
            smiles: self.smiles,
            inchi: self.inchi,
            inchikey: self.inchikey,
            descriptors: Descriptors {
                mol_weight: self.mol_weight,
                num_h_acceptors: self.num_h_acceptors,
                num_h_donors: self.num_h_donors,
                logp: self.logp,
                tpsa: self.tpsa,
                num_rot_bonds: self.num_rot_bonds,
                saturation: None,
            },
            fingerprint: None,
        };
        Ligand::from_record(record, Some(self.similarity))
    }
}

pub fn read_analogs_csv(path: &Path) -> Result<Vec<AnalogRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| {
        LeadOptError::Config(format!("Cannot read analogs from {}: {}", path.display(), e))
    })?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

pub fn write_analogs_csv(path: &Path, records: &[AnalogRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Scores candidates against the reference; candidates without a usable
/// fingerprint are dropped with a warning.
pub fn score_candidates(reference: &Ligand, candidates: Vec<CompoundRecord>) -> Result<Vec<Ligand>> {
    let reference_fp = reference.record.fingerprint()?;
    let mut scored = Vec::with_capacity(candidates.len());
    for record in candidates {
        match record.fingerprint() {
            Ok(fp) => {
                let similarity = crate::fingerprint::dice_similarity(&reference_fp, &fp);
                scored.push(Ligand::from_record(record, Some(similarity)));
            }
            Err(e) => warn!(cid = %record.cid, error = %e, "Skipping analog without fingerprint"),
        }
    }
    Ok(scored)
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Orders all candidates by similarity (stable) and takes the `max_druglike`
/// with the highest total drug score.
pub fn select_druglike(mut all: Vec<Ligand>, max_druglike: usize) -> (Vec<AnalogRecord>, Vec<Ligand>) {
    all.sort_by(|a, b| descending(a.similarity.unwrap_or(0.0), b.similarity.unwrap_or(0.0)));
    let table = all.iter().map(AnalogRecord::from_ligand).collect();

    all.sort_by(|a, b| descending(a.scores.drug_score_total, b.scores.drug_score_total));
    all.truncate(max_druglike);
    (table, all)
}

/// Runs the search (or replays `frozen`), writes `analogs_all.csv` and one
/// property table per kept analog, and returns the kept analogs.
pub async fn run(
    reference: &Ligand,
    spec: &SimilaritySearchSpec,
    pubchem: &PubChemClient,
    output_dir: &Path,
    frozen: Option<&Path>,
) -> Result<Vec<Ligand>> {
    tokio::fs::create_dir_all(output_dir).await?;

    let all = match frozen {
        Some(path) => {
            info!(path = %path.display(), "Replaying frozen similarity search results");
            read_analogs_csv(path)?.into_iter().map(AnalogRecord::into_ligand).collect()
        }
        None => match spec.search_engine {
            SearchEngine::PubChem => {
                let hits = pubchem
                    .similarity_search(reference.smiles(), spec.min_similarity_percent, spec.max_num_results)
                    .await?;
                score_candidates(reference, hits)?
            }
        },
    };

    let found = all.len();
    let (table, analogs) = select_druglike(all, spec.max_num_druglike);
    write_analogs_csv(&output_dir.join(ANALOGS_ALL_FILE), &table)?;
    for analog in &analogs {
        analog
            .property_table()
            .write_csv(&output_dir.join(format!("CID_{}.csv", analog.cid)))?;
        debug!(cid = %analog.cid, drug_score_total = analog.scores.drug_score_total, "Analog kept");
    }
    info!(found, kept = analogs.len(), "Similarity search complete");
    Ok(analogs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use leadopt_test_utils::{write_fixture, ANALOGS_CSV};
    use pretty_assertions::assert_eq;

    fn record(cid: &str, bits: &[usize], mol_weight: f64) -> CompoundRecord {
        let mut fp = Fingerprint::new(881);
        bits.iter().for_each(|&b| fp.set_bit(b));
        CompoundRecord {
            cid: cid.into(),
            name: None,
            iupac_name: None,
            smiles: "CCO".into(),
            inchi: None,
            inchikey: None,
            descriptors: Descriptors {
                mol_weight,
                num_h_acceptors: 4,
                num_h_donors: 1,
                logp: 2.5,
                tpsa: 60.0,
                num_rot_bonds: 3,
                saturation: None,
            },
            fingerprint: Some(fp.to_pubchem_base64()),
        }
    }

    #[test]
    fn test_score_and_select() {
        let reference = Ligand::from_record(record("1", &[1, 2, 3, 4], 300.0), None);
        let candidates = vec![
            record("10", &[1, 2], 700.0),      // sim 0.67, poor drug score
            record("11", &[1, 2, 3, 4], 310.0), // sim 1.0
            record("12", &[1, 2, 3], 320.0),    // sim 0.86
            CompoundRecord { fingerprint: None, ..record("13", &[], 300.0) },
        ];
        let scored = score_candidates(&reference, candidates).unwrap();
        assert_eq!(scored.len(), 3);

        let (table, kept) = select_druglike(scored, 2);
        let by_similarity: Vec<&str> = table.iter().map(|r| r.cid.as_str()).collect();
        assert_eq!(by_similarity, vec!["11", "12", "10"]);
        assert_eq!(table[1].similarity, 0.86);
        let kept: Vec<&str> = kept.iter().map(|l| l.cid.as_str()).collect();
        assert!(!kept.contains(&"10"));
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_analog_csv_round_trip_recomputes_scores() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "analogs_all.csv", ANALOGS_CSV);
        let records = read_analogs_csv(&path).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].cid, "176870");
        assert_eq!(records[0].iupac_name, None);

        let ligand = records[1].clone().into_ligand();
        assert_eq!(ligand.similarity, Some(0.88));
        let again = AnalogRecord::from_ligand(&ligand);
        assert_eq!(again.drug_score_total, ligand.scores.drug_score_total);

        let out = dir.path().join("out.csv");
        write_analogs_csv(&out, &records).unwrap();
        assert_eq!(read_analogs_csv(&out).unwrap(), records);
    }

    #[tokio::test]
    async fn test_run_with_frozen_data() {
        use crate::specs::SearchEngine;
        use leadopt_common::{HttpFetcher, PollPolicy, RetryPolicy, SandboxClient};

        let dir = tempfile::tempdir().unwrap();
        let frozen = write_fixture(dir.path(), "frozen/analogs_all.csv", ANALOGS_CSV);
        let out = dir.path().join("4_Ligand Similarity Search");
        let http = HttpFetcher::new(SandboxClient::new().unwrap(), RetryPolicy::immediate(1));
        let pubchem = PubChemClient::new(http, PollPolicy::new(1, 0.0));
        let reference = Ligand::from_record(record("123631", &[1], 446.9), None);
        let spec = SimilaritySearchSpec {
            search_engine: SearchEngine::PubChem,
            min_similarity_percent: 75,
            max_num_results: 30,
            max_num_druglike: 3,
        };

        let analogs = run(&reference, &spec, &pubchem, &out, Some(&frozen)).await.unwrap();
        assert_eq!(analogs.len(), 3);
        assert!(out.join(ANALOGS_ALL_FILE).exists());
        for analog in &analogs {
            assert!(out.join(format!("CID_{}.csv", analog.cid)).exists());
        }
        let totals: Vec<f64> = analogs.iter().map(|a| a.scores.drug_score_total).collect();
        assert!(totals.windows(2).all(|w| w[0] >= w[1]));
    }
}
