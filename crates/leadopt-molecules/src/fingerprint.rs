//! Substructure-key fingerprints and Dice similarity.
//!
//! Fingerprints come from PubChem's `Fingerprint2D` property: base64 of a
//! 4-byte big-endian bit count followed by the 881 CACTVS substructure keys,
//! most significant bit first.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use leadopt_common::{LeadOptError, Result};

/// A fixed-size bit vector fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    bits: Vec<u64>,
    nbits: usize,
}

impl Fingerprint {
    /// Create an empty fingerprint of the given size.
    pub fn new(nbits: usize) -> Self {
        Fingerprint {
            bits: vec![0u64; nbits.div_ceil(64)],
            nbits,
        }
    }

    pub fn set_bit(&mut self, pos: usize) {
        if pos < self.nbits {
            self.bits[pos / 64] |= 1u64 << (pos % 64);
        }
    }

    pub fn get_bit(&self, pos: usize) -> bool {
        pos < self.nbits && (self.bits[pos / 64] >> (pos % 64)) & 1 == 1
    }

    pub fn count_ones(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Decode a PubChem `Fingerprint2D` string.
    pub fn from_pubchem_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| LeadOptError::Parse(format!("Invalid fingerprint encoding: {}", e)))?;
        if bytes.len() < 4 {
            return Err(LeadOptError::Parse("Fingerprint shorter than its length prefix".into()));
        }
        let nbits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let payload = &bytes[4..];
        if payload.len() * 8 < nbits {
            return Err(LeadOptError::Parse(format!(
                "Fingerprint declares {} bits but carries only {}",
                nbits,
                payload.len() * 8
            )));
        }

        let mut fp = Fingerprint::new(nbits);
        for pos in 0..nbits {
            if payload[pos / 8] & (0x80 >> (pos % 8)) != 0 {
                fp.set_bit(pos);
            }
        }
        Ok(fp)
    }

    /// Encode back into PubChem's layout.
    pub fn to_pubchem_base64(&self) -> String {
        let mut bytes = (self.nbits as u32).to_be_bytes().to_vec();
        bytes.resize(4 + self.nbits.div_ceil(8), 0);
        for pos in (0..self.nbits).filter(|&p| self.get_bit(p)) {
            bytes[4 + pos / 8] |= 0x80 >> (pos % 8);
        }
        STANDARD.encode(bytes)
    }
}

/// Dice coefficient `2|A∩B| / (|A|+|B|)`, rounded to two decimals.
/// Two empty fingerprints are identical.
pub fn dice_similarity(fp1: &Fingerprint, fp2: &Fingerprint) -> f64 {
    let mut and_count = 0u32;
    for (w1, w2) in fp1.bits.iter().zip(fp2.bits.iter()) {
        and_count += (w1 & w2).count_ones();
    }
    let total = fp1.count_ones() + fp2.count_ones();
    if total == 0 {
        return 1.0;
    }
    round_to(2.0 * and_count as f64 / total as f64, 2)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp_with(bits: &[usize]) -> Fingerprint {
        let mut fp = Fingerprint::new(881);
        bits.iter().for_each(|&b| fp.set_bit(b));
        fp
    }

    #[test]
    fn test_self_similarity_is_one() {
        let fp = fp_with(&[0, 7, 100, 880]);
        assert_eq!(dice_similarity(&fp, &fp), 1.0);
    }

    #[test]
    fn test_dice_is_symmetric_and_rounded() {
        let a = fp_with(&[1, 2, 3]);
        let b = fp_with(&[2, 3, 4, 5]);
        // 2*2 / 7
        assert_eq!(dice_similarity(&a, &b), 0.57);
        assert_eq!(dice_similarity(&a, &b), dice_similarity(&b, &a));
    }

    #[test]
    fn test_empty_fingerprints_are_identical() {
        assert_eq!(dice_similarity(&Fingerprint::new(881), &Fingerprint::new(881)), 1.0);
        assert_eq!(dice_similarity(&Fingerprint::new(881), &fp_with(&[3])), 0.0);
    }

    #[test]
    fn test_pubchem_encoding_round_trip() {
        let fp = fp_with(&[0, 9, 880]);
        let encoded = fp.to_pubchem_base64();
        let decoded = Fingerprint::from_pubchem_base64(&encoded).unwrap();
        assert_eq!(decoded, fp);
        assert!(decoded.get_bit(0) && decoded.get_bit(9) && decoded.get_bit(880));
        assert_eq!(decoded.count_ones(), 3);
    }

    #[test]
    fn test_pubchem_bit_order_is_msb_first() {
        // length 16, bytes 0x80 0x01 -> bits 0 and 15
        let encoded = STANDARD.encode([0u8, 0, 0, 16, 0x80, 0x01]);
        let fp = Fingerprint::from_pubchem_base64(&encoded).unwrap();
        assert!(fp.get_bit(0));
        assert!(fp.get_bit(15));
        assert_eq!(fp.count_ones(), 2);
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let encoded = STANDARD.encode([0u8, 0, 3, 113, 0xFF]);
        assert!(Fingerprint::from_pubchem_base64(&encoded).is_err());
    }
}
