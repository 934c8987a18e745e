//! Drug-likeness scores computed from molecular descriptors.
//!
//! All functions are pure: the same descriptors always give the same scores.
//! Every score is rounded to two decimals before being combined, so the total
//! is reproducible from the stored sub-scores.

use serde::{Deserialize, Serialize};

use crate::fingerprint::round_to;

/// Descriptor set shared by the reference ligand and every analog.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Descriptors {
    pub mol_weight: f64,
    pub num_h_acceptors: u32,
    pub num_h_donors: u32,
    pub logp: f64,
    pub tpsa: f64,
    pub num_rot_bonds: u32,
    /// Fraction of sp3 carbons, when known.
    pub saturation: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrugScores {
    pub drug_score_lipinski: f64,
    pub drug_score_qed: f64,
    pub drug_score_custom: f64,
    pub drug_score_total: f64,
}

impl DrugScores {
    pub fn from_descriptors(d: &Descriptors) -> Self {
        let lipinski = lipinski_score(d);
        let qed = qed_score(d);
        let custom = custom_score(d);
        DrugScores {
            drug_score_lipinski: lipinski,
            drug_score_qed: qed,
            drug_score_custom: custom,
            drug_score_total: total_score(qed, custom, lipinski),
        }
    }
}

// ---------------------------------------------------------------------------
// Lipinski
// ---------------------------------------------------------------------------

/// Fraction of the four Rule-of-Five criteria met.
pub fn lipinski_score(d: &Descriptors) -> f64 {
    let passes = [
        d.mol_weight < 500.0,
        d.num_h_acceptors <= 10,
        d.num_h_donors <= 5,
        d.logp < 5.0,
    ];
    round_to(passes.iter().filter(|&&p| p).count() as f64 / 4.0, 2)
}

// ---------------------------------------------------------------------------
// QED
// ---------------------------------------------------------------------------

/// QED weights from Bickerton 2012 for MW, LogP, HBA, HBD, TPSA, RotBonds.
const QED_WEIGHTS: [f64; 6] = [0.66, 0.46, 0.05, 0.61, 0.06, 0.65];

/// Asymmetric Gaussian desirability: (center, width left, width right).
const QED_SHAPES: [(f64, f64, f64); 6] = [
    (300.0, 120.0, 200.0), // MW
    (2.5, 2.5, 2.5),       // LogP
    (4.0, 4.0, 6.0),       // HBA
    (1.0, 1.0, 4.0),       // HBD
    (60.0, 40.0, 80.0),    // TPSA
    (3.0, 3.0, 7.0),       // RotBonds
];

fn desirability(x: f64, (center, sigma_l, sigma_r): (f64, f64, f64)) -> f64 {
    let sigma = if x <= center { sigma_l } else { sigma_r };
    let z = (x - center) / sigma;
    (-0.5 * z * z).exp()
}

/// Weighted geometric mean of per-property desirabilities.
pub fn qed_score(d: &Descriptors) -> f64 {
    let values = [
        d.mol_weight,
        d.logp,
        d.num_h_acceptors as f64,
        d.num_h_donors as f64,
        d.tpsa,
        d.num_rot_bonds as f64,
    ];

    let mut log_sum = 0.0;
    let mut weight_sum = 0.0;
    for ((&x, &w), &shape) in values.iter().zip(QED_WEIGHTS.iter()).zip(QED_SHAPES.iter()) {
        let d = desirability(x, shape).max(1e-10);
        log_sum += w * d.ln();
        weight_sum += w;
    }
    round_to((log_sum / weight_sum).exp().clamp(0.0, 1.0), 2)
}

// ---------------------------------------------------------------------------
// Custom (Hopkins-style) score
// ---------------------------------------------------------------------------

fn mol_weight_term(mw: f64) -> f64 {
    if mw <= 440.0 {
        (-(mw - 300.0).powi(2) / 15000.0).exp()
    } else {
        (-(mw - 180.0) / 190.0).exp() + 0.01
    }
}

fn h_acceptor_term(n: u32) -> f64 {
    let n = n as f64;
    if n < 4.0 {
        (-(n - 3.0).powi(2) / 3.0).exp()
    } else {
        (-0.3 * n / 0.8 + 1.4).exp()
    }
}

fn h_donor_term(n: u32) -> f64 {
    if n == 0 {
        return 0.6;
    }
    let n = n as f64;
    let base = (-(n - 1.0).powi(2) / 5.0).exp();
    if n < 5.0 { base } else { base + 0.4 / n }
}

fn logp_term(logp: f64) -> f64 {
    (-(logp - 2.5).powi(2) / 9.0).exp()
}

fn tpsa_term(tpsa: f64) -> f64 {
    if tpsa < 50.0 {
        0.015 * tpsa + 0.25
    } else {
        (-(tpsa - 50.0).powi(2) / 8000.0).exp()
    }
}

fn rot_bonds_term(n: u32) -> f64 {
    let n = n as f64;
    let base = (-(n - 4.0).powi(2) / 19.0).exp();
    if n < 10.0 { base } else { base + 1.5 / n.powf(1.5) }
}

fn saturation_term(fsp3: f64) -> f64 {
    (-(fsp3 - 0.625).powi(2) / 0.05).exp()
}

/// Mean of the desirability terms; saturation joins only when known.
pub fn custom_score(d: &Descriptors) -> f64 {
    let mut terms = vec![
        mol_weight_term(d.mol_weight),
        h_acceptor_term(d.num_h_acceptors),
        h_donor_term(d.num_h_donors),
        logp_term(d.logp),
        tpsa_term(d.tpsa),
        rot_bonds_term(d.num_rot_bonds),
    ];
    if let Some(s) = d.saturation {
        terms.push(saturation_term(s));
    }
    round_to(terms.iter().sum::<f64>() / terms.len() as f64, 2)
}

/// `(3·QED + 2·custom + Lipinski) / 6`, rounded to two decimals.
pub fn total_score(qed: f64, custom: f64, lipinski: f64) -> f64 {
    round_to((3.0 * qed + 2.0 * custom + lipinski) / 6.0, 2)
}
