//! leadopt: automated lead optimization around a protein target.
//! Entry point for the command-line binary.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadopt_common::{HttpFetcher, SandboxClient};
use leadopt_molecules::docking::SminaRunner;
use leadopt_molecules::dogsitescorer::DogSiteClient;
use leadopt_molecules::interactions::{self, Combinator, InteractionConstraint, PlipRunner};
use leadopt_molecules::obabel::ObabelRunner;
use leadopt_molecules::pdb::StructureFetcher;
use leadopt_molecules::pipeline::{FrozenData, LeadOptimizationPipeline};
use leadopt_molecules::pubchem::PubChemClient;
use leadopt_molecules::specs::Specs;

#[derive(Debug, Parser)]
#[command(name = "leadopt", version, about = "Automated lead optimization pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full pipeline for one specification file.
    Run {
        /// Project name; results go to <output>/<project>.
        #[arg(long)]
        project: String,
        /// Pipeline specification table (CSV).
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value = "output")]
        output: PathBuf,
        /// analogs_all.csv from an earlier run, replacing the PubChem search.
        #[arg(long)]
        frozen_similarity: Option<PathBuf>,
        /// Folder with prepared receptor and CID_<cid>.pdbqt ligand files.
        #[arg(long)]
        frozen_docking: Option<PathBuf>,
    },
    /// Validate a specification file and print it resolved, as JSON.
    CheckSpecs {
        #[arg(long)]
        input: PathBuf,
    },
    /// List the poses of a finished run that make the given interactions.
    FindPoses {
        /// interaction_results.csv of a finished run.
        #[arg(long)]
        results: PathBuf,
        /// Required interaction as <type>:<residue>, e.g. h_bond:793.
        #[arg(long = "require", required = true)]
        constraints: Vec<InteractionConstraint>,
        /// Accept poses matching any constraint instead of all of them.
        #[arg(long)]
        any: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("leadopt=debug,info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { project, input, output, frozen_similarity, frozen_docking } => {
            let frozen = FrozenData {
                similarity_search: frozen_similarity,
                docking_pdbqt_files: frozen_docking,
            };
            run(&project, &input, &output, frozen).await
        }
        Command::CheckSpecs { input } => {
            let specs = Specs::from_csv_path(&input)
                .with_context(|| format!("Invalid specification {}", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&specs)?);
            Ok(())
        }
        Command::FindPoses { results, constraints, any } => {
            let poses = interactions::load_pose_interactions(&results)?;
            let combinator = if any { Combinator::Any } else { Combinator::All };
            let hits = interactions::find_poses(&poses, &constraints, combinator);
            info!("{} of {} poses match", hits.len(), poses.len());
            for (cid, pose) in hits {
                println!("{}\t{}", cid, pose);
            }
            Ok(())
        }
    }
}

async fn run(project: &str, input: &Path, output: &Path, frozen: FrozenData) -> anyhow::Result<()> {
    validate_project_name(project)?;

    info!("leadopt {} starting", env!("CARGO_PKG_VERSION"));
    let config = config::Config::load()?;
    info!(
        smina = %config.tools.smina.display(),
        obabel = %config.tools.obabel.display(),
        plip = %config.tools.plip.display(),
        concurrency = config.workspace.concurrency,
        "Configuration loaded"
    );

    let specs = Specs::from_csv_path(input)
        .with_context(|| format!("Invalid specification {}", input.display()))?;
    let pipeline = build_pipeline(&config)?;
    let report = pipeline.run(project, &specs, output, &frozen).await?;

    info!(
        run_id = %report.run_id,
        analogs = report.analogs.len(),
        poses = report.num_poses,
        "Results written to {}",
        report.output_dir.display()
    );
    for cid in &report.optimized_cids {
        println!("{}", cid);
    }
    Ok(())
}

fn build_pipeline(config: &config::Config) -> anyhow::Result<LeadOptimizationPipeline> {
    let client = SandboxClient::with_timeout(Duration::from_secs(config.http.timeout_secs))?;
    let http = HttpFetcher::new(client, config.http.retry.clone());

    Ok(LeadOptimizationPipeline {
        structures: StructureFetcher::new(http.clone(), &config.workspace.cache_dir),
        pubchem: PubChemClient::new(http.clone(), config.polling.pubchem.clone()),
        dogsite: DogSiteClient::new(http, config.polling.dogsitescorer.clone()),
        obabel: ObabelRunner::new(&config.tools.obabel).with_ph(config.tools.protonation_ph),
        docking_engine: Arc::new(SminaRunner::new(&config.tools.smina)),
        profiler: Arc::new(PlipRunner::new(&config.tools.plip)),
        concurrency: config.workspace.concurrency,
    })
}

/// Project names become folder names.
fn validate_project_name(name: &str) -> anyhow::Result<()> {
    let pattern = regex::Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 _.-]*$")?;
    if !pattern.is_match(name) {
        anyhow::bail!("Invalid project name `{}`: use letters, digits, space, `_`, `.` or `-`", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_name_validation() {
        assert!(validate_project_name("EGFR").is_ok());
        assert!(validate_project_name("egfr_3w32 run-2").is_ok());
        assert!(validate_project_name("../etc").is_err());
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("a/b").is_err());
    }

    #[test]
    fn test_find_poses_arguments() {
        let cli = Cli::try_parse_from([
            "leadopt",
            "find-poses",
            "--results",
            "out/interaction_results.csv",
            "--require",
            "h_bond:793",
            "--require",
            "hydrophobic:718",
            "--any",
        ])
        .unwrap();
        match cli.command {
            Command::FindPoses { constraints, any, .. } => {
                assert_eq!(constraints.len(), 2);
                assert_eq!(constraints[0].resnr, 793);
                assert!(any);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_find_poses_rejects_malformed_constraint() {
        let parsed = Cli::try_parse_from(["leadopt", "find-poses", "--results", "r.csv", "--require", "h_bond"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_check_specs_against_fixture() {
        let specs = Specs::from_csv_str(include_str!("../../leadopt-test-utils/fixtures/specs_3w32.csv")).unwrap();
        let json = serde_json::to_value(&specs).unwrap();
        assert!(json.get("docking").is_some());
    }
}
