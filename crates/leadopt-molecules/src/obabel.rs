//! OpenBabel wrapper: receptor and ligand preparation for docking.

use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use leadopt_common::{LeadOptError, Result};

use crate::process::run_checked;

pub const DEFAULT_PH: f64 = 7.4;

/// Wrapper for the `obabel` executable.
pub struct ObabelRunner {
    executable_path: PathBuf,
    ph: f64,
}

impl ObabelRunner {
    pub fn new<P: AsRef<Path>>(executable_path: P) -> Self {
        Self {
            executable_path: executable_path.as_ref().to_path_buf(),
            ph: DEFAULT_PH,
        }
    }

    pub fn with_ph(mut self, ph: f64) -> Self {
        self.ph = ph;
        self
    }

    /// Protonates a protein PDB file, assigns Gasteiger charges and writes a
    /// rigid receptor PDBQT.
    pub async fn protein_to_pdbqt(&self, pdb: &Path, pdbqt: &Path) -> Result<PathBuf> {
        info!("Preparing receptor {:?}", pdb);
        let mut cmd = Command::new(&self.executable_path);
        cmd.arg(pdb)
            .arg("-O")
            .arg(pdbqt)
            .arg("-xr")
            .arg("-p")
            .arg(self.ph.to_string())
            .arg("--partialcharge")
            .arg("gasteiger");
        self.convert(&mut cmd, pdbqt).await
    }

    /// Builds a 3D conformer from SMILES, protonated at the configured pH.
    pub async fn smiles_to_pdbqt(&self, smiles: &str, pdbqt: &Path) -> Result<PathBuf> {
        debug!(%smiles, "Preparing ligand {:?}", pdbqt);
        let mut cmd = Command::new(&self.executable_path);
        cmd.arg(format!("-:{}", smiles))
            .arg("-O")
            .arg(pdbqt)
            .arg("--gen3d")
            .arg("-p")
            .arg(self.ph.to_string())
            .arg("--partialcharge")
            .arg("gasteiger");
        self.convert(&mut cmd, pdbqt).await
    }

    // obabel reports most conversion failures on stderr but still exits 0.
    async fn convert(&self, cmd: &mut Command, output_path: &Path) -> Result<PathBuf> {
        let output = run_checked("obabel", cmd).await?;
        let written = tokio::fs::metadata(output_path).await.map(|m| m.len() > 0).unwrap_or(false);
        if !written {
            return Err(LeadOptError::Subprocess {
                program: "obabel".to_string(),
                status: "no output written".to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output_path.to_path_buf())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use leadopt_test_utils::write_fixture;

    #[tokio::test]
    async fn test_empty_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A stand-in that accepts any arguments and writes nothing.
        let fake = write_fixture(dir.path(), "obabel", "#!/bin/sh\necho '0 molecules converted' >&2\n");
        make_executable(&fake);

        let runner = ObabelRunner::new(&fake);
        let err = runner
            .smiles_to_pdbqt("CCO", &dir.path().join("CID_702.pdbqt"))
            .await
            .unwrap_err();
        match err {
            LeadOptError::Subprocess { stderr, .. } => assert!(stderr.contains("0 molecules")),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_written_output_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        // Writes its third argument, which is the path after -O.
        let fake = write_fixture(dir.path(), "obabel", "#!/bin/sh\necho 'ATOM' > \"$3\"\n");
        make_executable(&fake);

        let out = dir.path().join("receptor.pdbqt");
        let path = ObabelRunner::new(&fake)
            .protein_to_pdbqt(Path::new("protein.pdb"), &out)
            .await
            .unwrap();
        assert_eq!(path, out);
    }

    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}
