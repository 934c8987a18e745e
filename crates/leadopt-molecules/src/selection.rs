//! Ranking of tabular results and the final optimized-ligand selection.
//!
//! The same ranking serves two tables: DoGSiteScorer pockets and the merged
//! per-pose results. Rows are ordered descending, either lexicographically
//! over a list of columns or by a score expression; ties keep input order.

use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;
use tracing::info;

use leadopt_common::{LeadOptError, Result};

use crate::expr::ColumnSource;
use crate::interactions::{InteractionRow, InteractionType};
use crate::ligand::Ligand;
use crate::specs::{OptimizedLigandsSpec, Selection, TiePolicy};

pub const OPTIMIZED_LIGANDS_FILE: &str = "optimized_ligands.json";

// ── Generic ranking ──────────────────────────────────────────────────────────

/// Row indices ordered best first. Missing or NaN cells sort last.
pub fn rank_rows<R: ColumnSource>(rows: &[R], selection: &Selection) -> Result<Vec<usize>> {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    match selection {
        Selection::Sorting(columns) => {
            for column in columns {
                if !rows.is_empty() && rows.iter().all(|r| r.column(column).is_none()) {
                    return Err(LeadOptError::Config(format!("Unknown sorting column `{}`", column)));
                }
            }
            let keys: Vec<Vec<f64>> = rows
                .iter()
                .map(|r| columns.iter().map(|c| r.column(c).unwrap_or(f64::NAN)).collect())
                .collect();
            order.sort_by(|&a, &b| {
                keys[a]
                    .iter()
                    .zip(&keys[b])
                    .map(|(x, y)| descending(*x, *y))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }
        Selection::Function(expr) => {
            let scores = rows.iter().map(|r| expr.eval(r)).collect::<Result<Vec<f64>>>()?;
            order.sort_by(|&a, &b| descending(scores[a], scores[b]));
        }
    }
    Ok(order)
}

fn descending(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

// ── Merged pose table ────────────────────────────────────────────────────────

/// One docking pose with its interaction counts and its ligand's drug scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseRow {
    pub interactions: InteractionRow,
    pub drug_score_lipinski: f64,
    pub drug_score_qed: f64,
    pub drug_score_custom: f64,
    pub drug_score_total: f64,
}

impl PoseRow {
    pub fn cid(&self) -> &str {
        &self.interactions.cid
    }

    pub fn mode(&self) -> u32 {
        self.interactions.mode
    }

    pub fn affinity(&self) -> f64 {
        self.interactions.affinity
    }

    pub fn total_num_interactions(&self) -> u32 {
        self.interactions.total_num_interactions
    }
}

impl ColumnSource for PoseRow {
    fn column(&self, name: &str) -> Option<f64> {
        let i = &self.interactions;
        match name {
            "affinity" => Some(i.affinity),
            "rmsd_lb" => Some(i.rmsd_lb),
            "rmsd_ub" => Some(i.rmsd_ub),
            "total_num_interactions" => Some(i.total_num_interactions as f64),
            "drug_score_lipinski" => Some(self.drug_score_lipinski),
            "drug_score_qed" => Some(self.drug_score_qed),
            "drug_score_custom" => Some(self.drug_score_custom),
            "drug_score_total" => Some(self.drug_score_total),
            other => other.parse::<InteractionType>().ok().map(|t| i.count(t) as f64),
        }
    }
}

/// Sorting view of a pose row: affinity is compared by magnitude.
struct AbsAffinity<'a>(&'a PoseRow);

impl ColumnSource for AbsAffinity<'_> {
    fn column(&self, name: &str) -> Option<f64> {
        let value = self.0.column(name)?;
        Some(if name == "affinity" { value.abs() } else { value })
    }
}

/// Joins interaction rows with the drug scores of their ligands.
pub fn merge_pose_rows(rows: &[InteractionRow], ligands: &[Ligand]) -> Result<Vec<PoseRow>> {
    rows.iter()
        .map(|row| -> Result<PoseRow> {
            let ligand = ligands
                .iter()
                .find(|l| l.cid == row.cid)
                .ok_or_else(|| LeadOptError::Parse(format!("No ligand with CID {} for pose {}", row.cid, row.mode)))?;
            Ok(PoseRow {
                interactions: row.clone(),
                drug_score_lipinski: ligand.scores.drug_score_lipinski,
                drug_score_qed: ligand.scores.drug_score_qed,
                drug_score_custom: ligand.scores.drug_score_custom,
                drug_score_total: ligand.scores.drug_score_total,
            })
        })
        .collect()
}

/// Poses in ranked order.
pub fn rank_poses(rows: &[PoseRow], selection: &Selection) -> Result<Vec<usize>> {
    match selection {
        Selection::Sorting(_) => {
            let view: Vec<AbsAffinity<'_>> = rows.iter().map(AbsAffinity).collect();
            rank_rows(&view, selection)
        }
        Selection::Function(_) => rank_rows(rows, selection),
    }
}

// ── Optimized ligands ────────────────────────────────────────────────────────

/// The reference ligand's figures every analog is measured against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LigandMetrics {
    pub cid: String,
    pub drug_score_total: f64,
    pub binding_affinity_best: f64,
    pub num_total_interactions_highest: u32,
}

impl LigandMetrics {
    /// Best affinity and highest interaction count over one CID's poses.
    pub fn from_rows(cid: &str, rows: &[PoseRow]) -> Option<Self> {
        let own: Vec<&PoseRow> = rows.iter().filter(|r| r.cid() == cid).collect();
        let first = own.first()?;
        Some(LigandMetrics {
            cid: cid.to_string(),
            drug_score_total: first.drug_score_total,
            binding_affinity_best: own.iter().map(|r| r.affinity()).fold(f64::INFINITY, f64::min),
            num_total_interactions_highest: own.iter().map(|r| r.total_num_interactions()).max().unwrap_or(0),
        })
    }
}

/// Reference against the best-ranked analog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub reference: LigandMetrics,
    pub best_analog: Option<LigandMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizedLigands {
    pub reference: LigandMetrics,
    /// Affinity at least as good as the reference's best, strongest first.
    pub higher_affinity_poses: Vec<PoseRow>,
    /// At least as many interactions as the reference's best pose, most first.
    pub higher_interacting_poses: Vec<PoseRow>,
    pub higher_affinity_and_interacting_poses: Vec<PoseRow>,
    /// The poses above whose ligand is also at least as drug-like.
    pub druglike_improved_poses: Vec<PoseRow>,
    /// Every pose in ranked order.
    pub ranked_poses: Vec<PoseRow>,
    /// Up to `num_results` distinct CIDs, best first.
    pub optimized_cids: Vec<String>,
    pub comparison: Comparison,
}

impl OptimizedLigands {
    pub async fn write_json(&self, output_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(OPTIMIZED_LIGANDS_FILE);
        tokio::fs::write(&path, serde_json::to_string_pretty(self)?).await?;
        Ok(())
    }
}

/// Partitions the analog poses against the reference and ranks them.
///
/// The final list is drawn from the full ranked table, not from the
/// improved partitions, so it is never empty while poses exist.
pub fn select(reference: LigandMetrics, rows: Vec<PoseRow>, spec: &OptimizedLigandsSpec) -> Result<OptimizedLigands> {
    let tie = spec.tie_policy;
    let better_affinity = |r: &PoseRow| tie.at_most(r.affinity(), reference.binding_affinity_best);
    let more_interactions = |r: &PoseRow| {
        tie.at_least(r.total_num_interactions() as f64, reference.num_total_interactions_highest as f64)
    };

    let mut higher_affinity_poses: Vec<PoseRow> = rows.iter().filter(|r| better_affinity(*r)).cloned().collect();
    sort_by_affinity(&mut higher_affinity_poses);

    let mut higher_interacting_poses: Vec<PoseRow> = rows.iter().filter(|r| more_interactions(*r)).cloned().collect();
    higher_interacting_poses.sort_by(|a, b| b.total_num_interactions().cmp(&a.total_num_interactions()));

    let higher_affinity_and_interacting_poses: Vec<PoseRow> = higher_affinity_poses
        .iter()
        .filter(|r| more_interactions(*r))
        .cloned()
        .collect();
    let druglike_improved_poses = druglike_subset(&higher_affinity_and_interacting_poses, reference.drug_score_total, tie);

    let order = rank_poses(&rows, &spec.selection)?;
    let ranked_poses: Vec<PoseRow> = order.into_iter().map(|i| rows[i].clone()).collect();
    let mut optimized_cids: Vec<String> = Vec::new();
    for row in &ranked_poses {
        if optimized_cids.len() == spec.num_results {
            break;
        }
        if !optimized_cids.iter().any(|c| c == row.cid()) {
            optimized_cids.push(row.cid().to_string());
        }
    }

    let best_analog = optimized_cids.first().and_then(|cid| LigandMetrics::from_rows(cid, &rows));
    info!(
        higher_affinity = higher_affinity_poses.len(),
        higher_interacting = higher_interacting_poses.len(),
        both = higher_affinity_and_interacting_poses.len(),
        druglike = druglike_improved_poses.len(),
        selected = ?optimized_cids,
        "Optimized ligands selected"
    );
    Ok(OptimizedLigands {
        comparison: Comparison {
            reference: reference.clone(),
            best_analog,
        },
        reference,
        higher_affinity_poses,
        higher_interacting_poses,
        higher_affinity_and_interacting_poses,
        druglike_improved_poses,
        ranked_poses,
        optimized_cids,
    })
}

fn sort_by_affinity(rows: &mut [PoseRow]) {
    rows.sort_by(|a, b| a.affinity().partial_cmp(&b.affinity()).unwrap_or(Ordering::Equal));
}

fn druglike_subset(rows: &[PoseRow], reference_score: f64, tie: TiePolicy) -> Vec<PoseRow> {
    rows.iter()
        .filter(|r| tie.at_least(r.drug_score_total, reference_score))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ScoreExpr;
    use crate::specs::{DEFAULT_LIGAND_FUNCTION, OPTIMIZED_LIGAND_CRITERIA};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn row(cid: &str, mode: u32, affinity: f64, total: u32, drug: f64) -> PoseRow {
        PoseRow {
            interactions: InteractionRow {
                cid: cid.into(),
                mode,
                affinity,
                rmsd_lb: 0.0,
                rmsd_ub: 0.0,
                h_bond: total.min(1),
                hydrophobic: total.saturating_sub(1),
                salt_bridge: 0,
                water_bridge: 0,
                pi_stacking: 0,
                pi_cation: 0,
                halogen: 0,
                metal: 0,
                total_num_interactions: total,
            },
            drug_score_lipinski: 1.0,
            drug_score_qed: 0.5,
            drug_score_custom: 0.5,
            drug_score_total: drug,
        }
    }

    fn sorting(columns: &[&str]) -> Selection {
        Selection::Sorting(columns.iter().map(|c| c.to_string()).collect())
    }

    fn reference() -> LigandMetrics {
        LigandMetrics {
            cid: "123631".into(),
            drug_score_total: 0.66,
            binding_affinity_best: -9.0,
            num_total_interactions_highest: 4,
        }
    }

    fn spec(selection: Selection, num_results: usize, tie_policy: TiePolicy) -> OptimizedLigandsSpec {
        OptimizedLigandsSpec { num_results, selection, tie_policy }
    }

    #[test]
    fn test_sorting_uses_affinity_magnitude() {
        let rows = vec![
            row("176870", 1, -8.1, 6, 0.64),
            row("10184653", 1, -10.2, 3, 0.60),
            row("5291", 1, -10.2, 5, 0.61),
        ];
        let order = rank_poses(&rows, &sorting(&["affinity", "total_num_interactions"])).unwrap();
        assert_eq!(rows[order[0]].cid(), "5291");
        assert_eq!(order, vec![2, 1, 0]);
    }

    #[test]
    fn test_function_uses_signed_affinity() {
        let rows = vec![row("a", 1, -8.0, 2, 0.5), row("b", 1, -9.0, 1, 0.5)];
        let expr = ScoreExpr::parse_with_columns(DEFAULT_LIGAND_FUNCTION, OPTIMIZED_LIGAND_CRITERIA).unwrap();
        // a: 16 + 1.0 = 17; b: 18 + 0.5 = 18.5
        assert_eq!(rank_poses(&rows, &Selection::Function(expr)).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_rank_rows_is_stable_and_nan_last() {
        let table: Vec<BTreeMap<String, f64>> = [(1.0, 2.0), (f64::NAN, 9.0), (1.0, 2.0), (3.0, 0.0)]
            .iter()
            .map(|&(x, y)| BTreeMap::from([("x".to_string(), x), ("y".to_string(), y)]))
            .collect();
        assert_eq!(rank_rows(&table, &sorting(&["x", "y"])).unwrap(), vec![3, 0, 2, 1]);
        assert!(matches!(rank_rows(&table, &sorting(&["z"])), Err(LeadOptError::Config(_))));
        assert!(rank_rows(&Vec::<BTreeMap<String, f64>>::new(), &sorting(&["z"])).unwrap().is_empty());
    }

    #[test]
    fn test_partitions_with_inclusive_ties() {
        let rows = vec![
            row("176870", 1, -9.0, 4, 0.64),
            row("176870", 2, -8.5, 6, 0.64),
            row("5291", 1, -9.6, 5, 0.70),
            row("5291", 2, -7.0, 1, 0.70),
        ];
        let result = select(reference(), rows, &spec(sorting(&["affinity"]), 3, TiePolicy::Inclusive)).unwrap();

        let ids = |rows: &[PoseRow]| rows.iter().map(|r| (r.cid().to_string(), r.mode())).collect::<Vec<_>>();
        assert_eq!(ids(&result.higher_affinity_poses), vec![("5291".into(), 1), ("176870".into(), 1)]);
        assert_eq!(
            ids(&result.higher_interacting_poses),
            vec![("176870".into(), 2), ("5291".into(), 1), ("176870".into(), 1)]
        );
        assert_eq!(ids(&result.higher_affinity_and_interacting_poses), vec![("5291".into(), 1), ("176870".into(), 1)]);
        assert_eq!(ids(&result.druglike_improved_poses), vec![("5291".into(), 1)]);
        assert_eq!(result.optimized_cids, vec!["5291".to_string(), "176870".to_string()]);

        let best = result.comparison.best_analog.unwrap();
        assert_eq!(best.binding_affinity_best, -9.6);
        assert_eq!(best.num_total_interactions_highest, 5);
    }

    #[test]
    fn test_strict_ties_exclude_equal_poses() {
        let rows = vec![row("176870", 1, -9.0, 4, 0.66)];
        let result = select(reference(), rows, &spec(sorting(&["affinity"]), 1, TiePolicy::Strict)).unwrap();
        assert!(result.higher_affinity_poses.is_empty());
        assert!(result.higher_interacting_poses.is_empty());
        // ranking still draws from the full table
        assert_eq!(result.optimized_cids, vec!["176870".to_string()]);
    }

    #[test]
    fn test_num_results_caps_distinct_cids() {
        let rows = vec![
            row("1", 1, -10.0, 1, 0.5),
            row("1", 2, -9.9, 1, 0.5),
            row("2", 1, -9.0, 1, 0.5),
            row("3", 1, -8.0, 1, 0.5),
        ];
        let result = select(reference(), rows, &spec(sorting(&["affinity"]), 2, TiePolicy::Inclusive)).unwrap();
        assert_eq!(result.optimized_cids, vec!["1".to_string(), "2".to_string()]);
        assert_eq!(result.ranked_poses.len(), 4);
    }

    #[test]
    fn test_pose_row_columns() {
        let r = row("1", 1, -9.0, 3, 0.5);
        assert_eq!(r.column("h_bond"), Some(1.0));
        assert_eq!(r.column("hydrophobic"), Some(2.0));
        assert_eq!(r.column("drug_score_total"), Some(0.5));
        assert_eq!(r.column("volume"), None);
    }
}
