//! PubChem PUG-REST client.
//!
//! Endpoints used:
//!   compound/{namespace}/{id}/cids/TXT          identifier → CID
//!   compound/cid/{cids}/property/{list}/JSON    compound records
//!   compound/similarity/smiles/JSON             asynchronous similarity search
//!   compound/listkey/{key}/property/{list}/JSON similarity results
//!
//! SMILES and InChI are sent as form bodies; names and InChIKeys go in the path.

use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;

use leadopt_common::{poll_for_keys, HttpFetcher, LeadOptError, PollPolicy, Result};

use crate::druglikeness::Descriptors;
use crate::ligand::{CompoundRecord, IdentifierType};

pub const PUBCHEM_BASE_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";

/// Properties requested for every compound record.
pub const PROPERTY_LIST: &str = "Title,IUPACName,CanonicalSMILES,InChI,InChIKey,MolecularWeight,\
XLogP,TPSA,HBondDonorCount,HBondAcceptorCount,RotatableBondCount,Fingerprint2D";

/// PubChem caps URL-listed CIDs per request well above this.
const CID_BATCH: usize = 100;

pub struct PubChemClient {
    http: HttpFetcher,
    poll: PollPolicy,
    base_url: String,
}

impl PubChemClient {
    pub fn new(http: HttpFetcher, poll: PollPolicy) -> Self {
        Self {
            http,
            poll,
            base_url: PUBCHEM_BASE_URL.to_string(),
        }
    }

    /// Points the client at another PUG-REST host (must be allow-listed).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| LeadOptError::Config(format!("Invalid PubChem base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| LeadOptError::Config("PubChem base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Resolves any identifier to its PubChem CIDs (best match first).
    #[instrument(skip(self))]
    pub async fn cids_for(&self, id_type: IdentifierType, value: &str) -> Result<Vec<String>> {
        let value = value.trim();
        let text = match id_type {
            IdentifierType::Cid => return Ok(vec![value.to_string()]),
            IdentifierType::Name | IdentifierType::IupacName => {
                let url = self.url(&["compound", "name", value, "cids", "TXT"])?;
                self.http.get_text(url.as_str()).await?
            }
            IdentifierType::Inchikey => {
                let url = self.url(&["compound", "inchikey", value, "cids", "TXT"])?;
                self.http.get_text(url.as_str()).await?
            }
            IdentifierType::Smiles | IdentifierType::Inchi => {
                let namespace = id_type.as_str();
                let url = self.url(&["compound", namespace, "cids", "TXT"])?;
                let form = [(namespace, value)];
                self.http
                    .send(url.as_str(), |c| Ok(c.post(url.as_str())?.form(&form[..])))
                    .await?
                    .text()
                    .await?
            }
        };

        let cids: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "0")
            .map(String::from)
            .collect();
        if cids.is_empty() {
            return Err(LeadOptError::remote(
                "pubchem",
                format!("No compound found for {} `{}`", id_type, value),
            ));
        }
        debug!(?cids, "Resolved CIDs");
        Ok(cids)
    }

    /// Converts an identifier of one type into another, via the best CID match.
    #[instrument(skip(self))]
    pub async fn convert_identifier(
        &self,
        input_type: IdentifierType,
        value: &str,
        output_type: IdentifierType,
    ) -> Result<String> {
        let cid = self
            .cids_for(input_type, value)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LeadOptError::remote("pubchem", format!("No CID for `{}`", value)))?;
        if output_type == IdentifierType::Cid {
            return Ok(cid);
        }

        let record = self
            .compound_records(std::slice::from_ref(&cid))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LeadOptError::remote("pubchem", format!("No record for CID {}", cid)))?;
        let converted = match output_type {
            IdentifierType::Cid => Some(record.cid),
            IdentifierType::Smiles => Some(record.smiles),
            IdentifierType::Name => record.name,
            IdentifierType::IupacName => record.iupac_name,
            IdentifierType::Inchi => record.inchi,
            IdentifierType::Inchikey => record.inchikey,
        };
        converted.ok_or_else(|| {
            LeadOptError::remote("pubchem", format!("CID {} has no {}", cid, output_type))
        })
    }

    /// Fetches full property records, preserving the order of `cids`.
    #[instrument(skip(self, cids), fields(n = cids.len()))]
    pub async fn compound_records(&self, cids: &[String]) -> Result<Vec<CompoundRecord>> {
        let mut records = Vec::with_capacity(cids.len());
        for chunk in cids.chunks(CID_BATCH) {
            let joined = chunk.join(",");
            let url = self.url(&["compound", "cid", &joined, "property", PROPERTY_LIST, "JSON"])?;
            let response = self.http.get_json(url.as_str()).await?;
            records.extend(parse_property_table(&response)?);
        }

        let mut ordered = Vec::with_capacity(records.len());
        for cid in cids {
            if let Some(pos) = records.iter().position(|r| &r.cid == cid) {
                ordered.push(records.swap_remove(pos));
            }
        }
        Ok(ordered)
    }

    /// Runs an asynchronous 2D similarity search and returns the hits' records.
    ///
    /// The submission answers with `Waiting.ListKey`; the list key location is
    /// then polled until a `PropertyTable` appears.
    #[instrument(skip(self))]
    pub async fn similarity_search(
        &self,
        smiles: &str,
        threshold_percent: u32,
        max_records: u32,
    ) -> Result<Vec<CompoundRecord>> {
        let url = self.url(&["compound", "similarity", "smiles", "JSON"])?;
        let params = [
            ("Threshold", threshold_percent.to_string()),
            ("MaxRecords", max_records.to_string()),
        ];
        let form = [("smiles", smiles)];
        let submitted: Value = self
            .http
            .send(url.as_str(), |c| Ok(c.post(url.as_str())?.query(&params[..]).form(&form[..])))
            .await?
            .json()
            .await?;

        let list_key = match parse_similarity_submission(&submitted)? {
            SimilarityReply::Hits(cids) => {
                info!(hits = cids.len(), "PubChem similarity search answered synchronously");
                return self.compound_records(&cids).await;
            }
            SimilarityReply::Waiting { list_key } => list_key,
        };
        info!(%list_key, "PubChem similarity job submitted");

        let results_url = self.url(&["compound", "listkey", &list_key, "property", PROPERTY_LIST, "JSON"])?;
        let response = poll_for_keys(&self.poll, results_url.as_str(), &["PropertyTable"], || {
            self.http.get_json(results_url.as_str())
        })
        .await?;

        let records = parse_property_table(&response)?;
        info!(hits = records.len(), "PubChem similarity search finished");
        Ok(records)
    }
}

// ── Response parsing ─────────────────────────────────────────────────────────

/// What the similarity submission answered.
#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityReply {
    /// Small searches come back synchronously with the hit CIDs.
    Hits(Vec<String>),
    /// The job was queued; poll its list key.
    Waiting { list_key: String },
}

/// Classifies the response to a similarity POST. A `Fault`, or a reply with
/// neither hits nor a list key, is an error.
pub fn parse_similarity_submission(submitted: &Value) -> Result<SimilarityReply> {
    if let Some(fault) = submitted.get("Fault") {
        let message = fault["Message"].as_str().unwrap_or("unknown fault");
        let details = fault["Details"]
            .as_array()
            .map(|d| d.iter().filter_map(text).collect::<Vec<_>>().join("; "))
            .unwrap_or_default();
        return Err(LeadOptError::remote(
            "pubchem",
            format!("Similarity search rejected: {} {}", message, details).trim_end().to_string(),
        ));
    }

    if let Some(cids) = submitted["IdentifierList"]["CID"].as_array() {
        return Ok(SimilarityReply::Hits(cids.iter().filter_map(text).collect()));
    }

    text(&submitted["Waiting"]["ListKey"])
        .map(|list_key| SimilarityReply::Waiting { list_key })
        .ok_or_else(|| {
            LeadOptError::remote(
                "pubchem",
                format!("Similarity submission returned no list key: {}", submitted),
            )
        })
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// PubChem renamed `CanonicalSMILES` to `ConnectivitySMILES`; accept either.
fn smiles_field(p: &Value) -> Option<String> {
    ["CanonicalSMILES", "ConnectivitySMILES", "SMILES", "IsomericSMILES"]
        .iter()
        .find_map(|k| text(&p[*k]))
}

/// Parses `PropertyTable.Properties` into compound records.
pub fn parse_property_table(response: &Value) -> Result<Vec<CompoundRecord>> {
    let properties = response["PropertyTable"]["Properties"].as_array().ok_or_else(|| {
        LeadOptError::Parse(format!("Missing PropertyTable.Properties in {}", response))
    })?;

    properties
        .iter()
        .map(|p| {
            let cid = text(&p["CID"])
                .ok_or_else(|| LeadOptError::Parse(format!("Property record without CID: {}", p)))?;
            let smiles = smiles_field(p)
                .ok_or_else(|| LeadOptError::Parse(format!("CID {} has no SMILES", cid)))?;
            let count = |k: &str| number(&p[k]).map(|n| n as u32).unwrap_or(0);
            Ok(CompoundRecord {
                name: text(&p["Title"]),
                iupac_name: text(&p["IUPACName"]),
                inchi: text(&p["InChI"]),
                inchikey: text(&p["InChIKey"]),
                descriptors: Descriptors {
                    mol_weight: number(&p["MolecularWeight"]).ok_or_else(|| {
                        LeadOptError::Parse(format!("CID {} has no MolecularWeight", cid))
                    })?,
                    num_h_acceptors: count("HBondAcceptorCount"),
                    num_h_donors: count("HBondDonorCount"),
                    logp: number(&p["XLogP"]).unwrap_or(0.0),
                    tpsa: number(&p["TPSA"]).unwrap_or(0.0),
                    num_rot_bonds: count("RotatableBondCount"),
                    saturation: None,
                },
                fingerprint: text(&p["Fingerprint2D"]),
                smiles,
                cid,
            })
        })
        .collect()
}
