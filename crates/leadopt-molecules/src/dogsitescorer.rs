//! DoGSiteScorer REST client (proteins.plus).
//!
//! A detection run is three round trips: optionally upload a local structure
//! and poll for its temporary id, submit the job and poll its location for
//! the result URLs, then download the table and the per-pocket files.

use flate2::read::GzDecoder;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};

use leadopt_common::{poll_for_keys, HttpFetcher, LeadOptError, PollPolicy, Result};

use crate::expr::ColumnSource;
use crate::specs::BoxCoordinates;

pub const DOGSITE_BASE_URL: &str = "https://proteins.plus/api";

const UPLOAD_FIELD: &str = "pdb_file[pathvar]";

/// One row of the result table plus its downloadable files.
#[derive(Debug, Clone, PartialEq)]
pub struct Pocket {
    pub name: String,
    pub values: BTreeMap<String, f64>,
    pub pdb_url: Option<String>,
    pub ccp4_url: Option<String>,
}

impl ColumnSource for Pocket {
    fn column(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

pub struct DogSiteClient {
    http: HttpFetcher,
    poll: PollPolicy,
    base_url: String,
}

impl DogSiteClient {
    pub fn new(http: HttpFetcher, poll: PollPolicy) -> Self {
        Self {
            http,
            poll,
            base_url: DOGSITE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Uploads a local structure and returns the temporary id that stands in
    /// for a PDB code in [`submit_job`](Self::submit_job).
    #[instrument(skip(self))]
    pub async fn upload_pdb_file(&self, path: &Path) -> Result<String> {
        let bytes = fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "protein.pdb".to_string());
        let url = format!("{}/pdb_files_rest", self.base_url);

        let response: Value = self
            .http
            .send(&url, |c| {
                let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                Ok(c.post(&url)?.multipart(Form::new().part(UPLOAD_FIELD, part)))
            })
            .await?
            .json()
            .await?;
        let location = string_field(&response, "location", "upload")?;

        let ready = poll_for_keys(&self.poll, &location, &["id"], || self.http.get_json(&location)).await?;
        let id = string_field(&ready, "id", "upload")?;
        info!(%id, "Structure uploaded to DoGSiteScorer");
        Ok(id)
    }

    /// Submits a detection job and returns the pocket table with file URLs.
    #[instrument(skip(self))]
    pub async fn submit_job(&self, pdb_id: &str, ligand_id: &str, chain_id: &str) -> Result<Vec<Pocket>> {
        let url = format!("{}/dogsite_rest", self.base_url);
        let body = json!({
            "dogsite": {
                "pdbCode": pdb_id,
                "analysisDetail": "1",
                "bindingSitePredictionGranularity": "1",
                "ligand": ligand_id,
                "chain": chain_id,
            }
        });

        let response: Value = self
            .http
            .send(&url, |c| Ok(c.post(&url)?.header("Accept", "application/json").json(&body)))
            .await?
            .json()
            .await?;
        let location = string_field(&response, "location", "job submission")?;
        info!(%location, "DoGSiteScorer job submitted");

        let result = poll_for_keys(
            &self.poll,
            &location,
            &["result_table", "residues", "pockets"],
            || self.http.get_json(&location),
        )
        .await?;

        let table_url = string_field(&result, "result_table", "job")?;
        let table = self.http.get_text(&table_url).await?;
        let mut pockets = parse_pocket_table(&table)?;

        let pdb_urls = url_list(&result["residues"]);
        let ccp4_urls = url_list(&result["pockets"]);
        for (i, pocket) in pockets.iter_mut().enumerate() {
            pocket.pdb_url = pdb_urls.get(i).cloned();
            pocket.ccp4_url = ccp4_urls.get(i).cloned();
        }
        info!(pockets = pockets.len(), "DoGSiteScorer job finished");
        Ok(pockets)
    }

    /// Saves `<name>.pdb` and the gunzipped `<name>.ccp4` for every pocket.
    pub async fn download_pocket_files(&self, pockets: &[Pocket], output_dir: &Path) -> Result<()> {
        fs::create_dir_all(output_dir).await?;
        for pocket in pockets {
            if let Some(url) = &pocket.pdb_url {
                let bytes = self.http.get_bytes(url).await?;
                fs::write(output_dir.join(format!("{}.pdb", pocket.name)), bytes).await?;
            }
            if let Some(url) = &pocket.ccp4_url {
                let gz = self.http.get_bytes(url).await?;
                fs::write(output_dir.join(format!("{}.ccp4", pocket.name)), gunzip(&gz)?).await?;
            }
            debug!(pocket = %pocket.name, "Pocket files saved");
        }
        Ok(())
    }
}

fn string_field(response: &Value, key: &str, step: &str) -> Result<String> {
    response[key].as_str().map(String::from).ok_or_else(|| {
        LeadOptError::remote(
            "dogsitescorer",
            format!("{} response lacks `{}`: {}", step, key, response),
        )
    })
}

fn url_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|urls| urls.iter().filter_map(|u| u.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}

// ── Result parsing ───────────────────────────────────────────────────────────

/// Parses the tab-separated result table, indexed by its `name` column.
/// Non-numeric cells are dropped.
pub fn parse_pocket_table(tsv: &str) -> Result<Vec<Pocket>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_reader(tsv.as_bytes());
    let headers = reader.headers()?.clone();
    let name_idx = headers
        .iter()
        .position(|h| h.trim() == "name")
        .ok_or_else(|| LeadOptError::Parse("DoGSiteScorer table has no `name` column".into()))?;

    let mut pockets = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(name) = record.get(name_idx).map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        let values = headers
            .iter()
            .zip(record.iter())
            .filter_map(|(h, v)| v.trim().parse::<f64>().ok().map(|n| (h.trim().to_string(), n)))
            .collect();
        pockets.push(Pocket {
            name: name.to_string(),
            values,
            pdb_url: None,
            ccp4_url: None,
        });
    }
    Ok(pockets)
}

/// Reads the search box from a pocket PDB file.
///
/// The pocket center is the first three numbers on the sixth non-coordinate
/// record, or on the first record mentioning `center` when the sixth does not
/// parse; the box edge is twice the trailing max-radius value.
pub fn parse_pocket_box(pdb_text: &str) -> Result<BoxCoordinates> {
    let others: Vec<&str> = pdb_text
        .lines()
        .filter(|l| !["ATOM", "HETATM", "ANISOU"].iter().any(|r| l.starts_with(r)))
        .collect();
    let (center, radius) = others
        .get(POCKET_CENTER_RECORD)
        .and_then(|l| center_and_radius(l))
        .or_else(|| {
            others
                .iter()
                .filter(|l| l.to_ascii_lowercase().contains("center"))
                .find_map(|l| center_and_radius(l))
        })
        .ok_or_else(|| LeadOptError::Parse("Pocket file has no center record".into()))?;

    Ok(BoxCoordinates { center, size: [radius * 2.0; 3] })
}

/// DoGSiteScorer writes the pocket center and max radius as the sixth
/// non-coordinate record.
const POCKET_CENTER_RECORD: usize = 5;

/// Reads `x y z .. radius` from a header record: the first three decimal
/// numbers and the last one.
fn center_and_radius(line: &str) -> Option<([f64; 3], f64)> {
    let numbers: Vec<f64> = line
        .split_whitespace()
        .filter(|t| t.contains('.'))
        .filter_map(|t| t.parse::<f64>().ok())
        .collect();
    if numbers.len() < 4 {
        return None;
    }
    Some(([numbers[0], numbers[1], numbers[2]], numbers[numbers.len() - 1]))
}

pub fn pocket_pdb_path(output_dir: &Path, pocket_name: &str) -> PathBuf {
    output_dir.join(format!("{}.pdb", pocket_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use leadopt_test_utils::{DOGSITE_TABLE_TSV, POCKET_HEADER_PDB, POCKET_PDB};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_parse_pocket_table() {
        let pockets = parse_pocket_table(DOGSITE_TABLE_TSV).unwrap();
        let names: Vec<&str> = pockets.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["P_0", "P_0_0", "P_1"]);
        assert_eq!(pockets[1].column("poc_cov"), Some(45.0));
        assert_eq!(pockets[0].column("drugScore"), Some(0.81));
        // string columns are not numeric criteria
        assert_eq!(pockets[0].column("lig_name"), None);
        assert_eq!(pockets[0].column("lid/hull"), None);
    }

    #[test]
    fn test_parse_pocket_box() {
        let b = parse_pocket_box(POCKET_PDB).unwrap();
        assert_eq!(b.center, [16.34, -2.5, 42.1]);
        assert_eq!(b.size, [18.5, 18.5, 18.5]);
    }

    #[test]
    fn test_parse_pocket_box_reads_sixth_header_record() {
        let b = parse_pocket_box(POCKET_HEADER_PDB).unwrap();
        assert_eq!(b.center, [21.114, -4.925, 38.771]);
        assert_eq!(b.size, [15.2, 15.2, 15.2]);
    }

    #[test]
    fn test_parse_pocket_box_falls_back_to_center_line() {
        let text = "HEADER    pocket P_2\n\
                    REMARK    pocket center  1.500  2.500  3.500 radius  4.000\n\
                    ATOM      1  N   MET A 695      10.000  11.000  12.000  1.00 20.00           N\n";
        let b = parse_pocket_box(text).unwrap();
        assert_eq!(b.center, [1.5, 2.5, 3.5]);
        assert_eq!(b.size, [8.0, 8.0, 8.0]);
    }

    #[test]
    fn test_parse_pocket_box_missing_center() {
        let text = "HEADER    pocket\nATOM      1  N   MET A 695      10.000  11.000  12.000  1.00 20.00           N\n";
        assert!(matches!(parse_pocket_box(text), Err(LeadOptError::Parse(_))));
    }

    #[test]
    fn test_gunzip() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"CCP4 map").unwrap();
        let gz = enc.finish().unwrap();
        assert_eq!(gunzip(&gz).unwrap(), b"CCP4 map");
    }

    #[tokio::test]
    #[ignore] // Requires network access
    async fn test_live_submit_job() {
        use leadopt_common::{RetryPolicy, SandboxClient};
        let http = HttpFetcher::new(SandboxClient::new().unwrap(), RetryPolicy::default());
        let client = DogSiteClient::new(http, PollPolicy::new(30, 5.0));
        let pockets = client.submit_job("3w32", "W32_A_1101", "A").await.unwrap();
        assert!(!pockets.is_empty());
    }
}
