//! Project output layout: one numbered folder per pipeline stage.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use leadopt_common::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputPaths {
    pub project: PathBuf,
    pub protein: PathBuf,
    pub ligand: PathBuf,
    pub binding_site: PathBuf,
    pub similarity_search: PathBuf,
    pub docking: PathBuf,
    pub interaction_analysis: PathBuf,
    pub visualizations: PathBuf,
    pub optimized_ligands: PathBuf,
}

impl OutputPaths {
    pub fn new<P: AsRef<Path>>(root: P, project_name: &str) -> Self {
        let project = root.as_ref().join(project_name);
        OutputPaths {
            protein: project.join("1_Protein"),
            ligand: project.join("2_Ligand"),
            binding_site: project.join("3_Binding Site Detection"),
            similarity_search: project.join("4_Ligand Similarity Search"),
            docking: project.join("5_Docking"),
            interaction_analysis: project.join("6_Interaction Analysis"),
            visualizations: project.join("7_Visualizations"),
            optimized_ligands: project.join("8_Optimized Ligands"),
            project,
        }
    }

    pub fn all(&self) -> [&Path; 8] {
        [
            &self.protein,
            &self.ligand,
            &self.binding_site,
            &self.similarity_search,
            &self.docking,
            &self.interaction_analysis,
            &self.visualizations,
            &self.optimized_ligands,
        ]
    }

    /// Creates every stage folder; existing folders are reused.
    pub async fn create(&self) -> Result<()> {
        for dir in self.all() {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}
