//! Ligand entities: identifiers, descriptors, drug scores and the ordered
//! property table written next to each ligand's artifacts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use leadopt_common::{LeadOptError, Result};

use crate::druglikeness::{Descriptors, DrugScores};
use crate::fingerprint::{dice_similarity, Fingerprint};
use crate::pubchem::PubChemClient;
use crate::specs::LigandSpec;

/// The identifier forms a ligand can be specified and resolved by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Name,
    IupacName,
    Smiles,
    Cid,
    Inchi,
    Inchikey,
}

impl IdentifierType {
    pub const ALL: [IdentifierType; 6] = [
        IdentifierType::Name,
        IdentifierType::IupacName,
        IdentifierType::Smiles,
        IdentifierType::Cid,
        IdentifierType::Inchi,
        IdentifierType::Inchikey,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Name => "name",
            IdentifierType::IupacName => "iupac_name",
            IdentifierType::Smiles => "smiles",
            IdentifierType::Cid => "cid",
            IdentifierType::Inchi => "inchi",
            IdentifierType::Inchikey => "inchikey",
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierType {
    type Err = LeadOptError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| LeadOptError::Config(format!("Unknown ligand identifier type `{}`", s)))
    }
}

/// One compound as returned by PubChem's property endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundRecord {
    pub cid: String,
    pub name: Option<String>,
    pub iupac_name: Option<String>,
    pub smiles: String,
    pub inchi: Option<String>,
    pub inchikey: Option<String>,
    pub descriptors: Descriptors,
    /// PubChem `Fingerprint2D`, base64.
    pub fingerprint: Option<String>,
}

impl CompoundRecord {
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        match &self.fingerprint {
            Some(encoded) => Fingerprint::from_pubchem_base64(encoded),
            None => Err(LeadOptError::Parse(format!("CID {} has no fingerprint", self.cid))),
        }
    }

    /// Dice similarity against another record's fingerprint.
    pub fn similarity_to(&self, other: &CompoundRecord) -> Result<f64> {
        Ok(dice_similarity(&self.fingerprint()?, &other.fingerprint()?))
    }
}

/// Keeps the longest `.`-separated fragment of a SMILES string, which drops
/// counter-ions and solvent molecules from salts.
pub fn remove_counterion(smiles: &str) -> &str {
    let mut longest = "";
    for fragment in smiles.split('.') {
        if fragment.len() > longest.len() {
            longest = fragment;
        }
    }
    if longest.is_empty() { smiles } else { longest }
}

/// A reference ligand or one of its analogs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ligand {
    pub cid: String,
    pub record: CompoundRecord,
    pub scores: DrugScores,
    /// Dice similarity to the reference ligand; `None` for the reference itself.
    pub similarity: Option<f64>,
}

impl Ligand {
    pub fn from_record(record: CompoundRecord, similarity: Option<f64>) -> Self {
        let scores = DrugScores::from_descriptors(&record.descriptors);
        Ligand {
            cid: record.cid.clone(),
            record,
            scores,
            similarity,
        }
    }

    /// Resolves the specified ligand through PubChem and scores it.
    pub async fn resolve(spec: &LigandSpec, pubchem: &PubChemClient) -> Result<Self> {
        info!(input_type = %spec.input_type, value = %spec.input_value, "Resolving ligand");
        let cid = pubchem
            .convert_identifier(spec.input_type, &spec.input_value, IdentifierType::Cid)
            .await?;
        let record = pubchem
            .compound_records(std::slice::from_ref(&cid))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LeadOptError::remote("pubchem", format!("No record for CID {}", cid)))?;
        let ligand = Ligand::from_record(record, None);
        debug!(cid = %ligand.cid, drug_score_total = ligand.scores.drug_score_total, "Ligand resolved");
        Ok(ligand)
    }

    pub fn smiles(&self) -> &str {
        &self.record.smiles
    }

    pub fn identifiers(&self) -> BTreeMap<IdentifierType, String> {
        let r = &self.record;
        let mut ids = BTreeMap::new();
        ids.insert(IdentifierType::Cid, r.cid.clone());
        ids.insert(IdentifierType::Smiles, r.smiles.clone());
        for (ty, value) in [
            (IdentifierType::Name, &r.name),
            (IdentifierType::IupacName, &r.iupac_name),
            (IdentifierType::Inchi, &r.inchi),
            (IdentifierType::Inchikey, &r.inchikey),
        ] {
            if let Some(v) = value {
                ids.insert(ty, v.clone());
            }
        }
        ids
    }

    /// The identifier, descriptor and score rows of the property table.
    pub fn property_table(&self) -> PropertyTable {
        let mut table = PropertyTable::default();
        for (ty, value) in self.identifiers() {
            table.push(ty.as_str(), value);
        }
        let d = &self.record.descriptors;
        table.push("mol_weight", d.mol_weight);
        table.push("num_H_acceptors", d.num_h_acceptors);
        table.push("num_H_donors", d.num_h_donors);
        table.push("logp", d.logp);
        table.push("tpsa", d.tpsa);
        table.push("num_rot_bonds", d.num_rot_bonds);
        if let Some(s) = d.saturation {
            table.push("saturation", s);
        }
        table.push("drug_score_qed", self.scores.drug_score_qed);
        table.push("drug_score_lipinski", self.scores.drug_score_lipinski);
        table.push("drug_score_custom", self.scores.drug_score_custom);
        table.push("drug_score_total", self.scores.drug_score_total);
        if let Some(sim) = self.similarity {
            table.push("similarity", sim);
        }
        table
    }
}

/// Ordered `Property,Value` rows; later stages append their statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PropertyTable {
    rows: Vec<(String, String)>,
}

impl PropertyTable {
    pub fn push(&mut self, property: &str, value: impl ToString) {
        let value = value.to_string();
        match self.rows.iter_mut().find(|(p, _)| p == property) {
            Some(row) => row.1 = value,
            None => self.rows.push((property.to_string(), value)),
        }
    }

    pub fn extend(&mut self, other: PropertyTable) {
        for (p, v) in other.rows {
            self.push(&p, v);
        }
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.rows.iter().find(|(p, _)| p == property).map(|(_, v)| v.as_str())
    }

    pub fn rows(&self) -> &[(String, String)] {
        &self.rows
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["Property", "Value"])?;
        for (p, v) in &self.rows {
            writer.write_record([p, v])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cid: &str, smiles: &str) -> CompoundRecord {
        CompoundRecord {
            cid: cid.to_string(),
            name: Some("gefitinib".into()),
            iupac_name: None,
            smiles: smiles.to_string(),
            inchi: None,
            inchikey: Some("XGALLCVXEZPNRQ-UHFFFAOYSA-N".into()),
            descriptors: Descriptors {
                mol_weight: 446.9,
                num_h_acceptors: 8,
                num_h_donors: 1,
                logp: 4.2,
                tpsa: 68.7,
                num_rot_bonds: 8,
                saturation: None,
            },
            fingerprint: None,
        }
    }

    #[test]
    fn test_remove_counterion_picks_longest_fragment() {
        assert_eq!(remove_counterion("CCN(CC)CC.Cl"), "CCN(CC)CC");
        assert_eq!(remove_counterion("[Na+].CC(=O)[O-]"), "CC(=O)[O-]");
        assert_eq!(remove_counterion("Cl.c1ccccc1CCN.O"), "c1ccccc1CCN");
    }

    #[test]
    fn test_remove_counterion_single_fragment_unchanged() {
        let smiles = "COCCOC1=C(C=C2C(=C1)C(=NC=N2)NC3=CC(=C(C=C3)F)Cl)OCCOC";
        assert_eq!(remove_counterion(smiles), smiles);
    }

    #[test]
    fn test_identifier_type_round_trip() {
        for ty in IdentifierType::ALL {
            assert_eq!(ty.as_str().parse::<IdentifierType>().unwrap(), ty);
        }
        assert!("smarts".parse::<IdentifierType>().is_err());
    }

    #[test]
    fn test_property_table_order_and_overwrite() {
        let ligand = Ligand::from_record(record("123631", "CCO"), Some(0.91));
        let mut table = ligand.property_table();
        assert_eq!(table.rows()[0].0, "name");
        assert_eq!(table.get("cid"), Some("123631"));
        assert_eq!(table.get("similarity"), Some("0.91"));
        table.push("similarity", 0.5);
        assert_eq!(table.get("similarity"), Some("0.5"));
        assert_eq!(table.rows().iter().filter(|(p, _)| p == "similarity").count(), 1);
    }

    #[test]
    fn test_property_table_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CID_1.csv");
        let ligand = Ligand::from_record(record("1", "CCO"), None);
        ligand.property_table().write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Property,Value\n"));
        assert!(text.contains("drug_score_total,"));
        assert!(!text.contains("similarity"));
    }
}
