//! Leadopt Molecules - automated lead optimization around a protein target.
//!
//! Starting from a protein structure and a known ligand, the pipeline:
//! 1. Defines the binding site (coordinates, co-crystallized ligand or DoGSiteScorer)
//! 2. Searches PubChem for analogs and scores their drug-likeness
//! 3. Docks the ligand and its analogs with smina
//! 4. Profiles protein-ligand interactions of every pose with PLIP
//! 5. Selects the analogs that improve on the reference ligand

pub mod expr;
pub mod specs;
pub mod fingerprint;
pub mod druglikeness;
pub mod ligand;
pub mod pubchem;
pub mod pdb;
pub mod protein;
pub mod output;
pub mod dogsitescorer;
pub mod binding_site;
pub mod similarity;
mod process;
pub mod obabel;
pub mod docking;
pub mod interactions;
pub mod selection;
pub mod pipeline;

pub use leadopt_common::{LeadOptError, Result};
