//! Free-text label to canonical category.
//!
//! Classifier labels and filenames both come through here, so nothing past
//! this point branches on raw text.

use crate::intake::model::DocCategory;

// Entries padded with spaces only match whole words of the normalized text.
const IDENTITY: &[&str] = &[
    "identity",
    "identite",
    "passport",
    "passeport",
    "id card",
    " cni ",
    " id ",
    "carte nationale",
    "titre de sejour",
    "residence permit",
    "driving licence",
    "driver license",
    "permis de conduire",
];

const PAYSLIP: &[&str] = &[
    "payslip",
    "pay slip",
    "paystub",
    "pay stub",
    "salary",
    "salaire",
    "bulletin de paie",
    "bulletin de salaire",
    "fiche de paie",
    "fiche paie",
    "bulletin",
    "paie",
];

const TAX_NOTICE: &[&str] = &[
    "tax notice",
    "tax return",
    "tax assessment",
    "avis d imposition",
    "avis imposition",
    "impot",
    "imposition",
    "fiscal",
    "tax",
];

const WORK_CONTRACT: &[&str] = &[
    "work contract",
    "employment contract",
    "contrat de travail",
    "employment",
    "employer certificate",
    "attestation employeur",
    " cdi ",
    " cdd ",
    "contract",
    "contrat",
];

const BANK_STATEMENT: &[&str] = &[
    "bank statement",
    "releve bancaire",
    "releve de compte",
    "releve",
    " rib ",
    "iban",
    "bank",
    "banque",
];

const RULES: [(DocCategory, &[&str]); 5] = [
    (DocCategory::Identity, IDENTITY),
    (DocCategory::Payslip, PAYSLIP),
    (DocCategory::TaxNotice, TAX_NOTICE),
    (DocCategory::WorkContract, WORK_CONTRACT),
    (DocCategory::BankStatement, BANK_STATEMENT),
];

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ÿ' => 'y',
        other => other,
    }
}

/// Lowercase, fold accents, turn every separator into a single space and pad
/// both ends so word-bounded keywords can match at the edges.
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push(' ');
    let mut last_space = true;
    for c in raw.chars().flat_map(char::to_lowercase).map(fold_accent) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    if !last_space {
        out.push(' ');
    }
    out
}

/// Map a classifier label or filename to a category. Total; unknown input is
/// [`DocCategory::Other`].
pub fn map_label(raw: &str) -> DocCategory {
    let text = normalize(raw);
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| text.contains(kw)))
        .map(|(category, _)| *category)
        .unwrap_or(DocCategory::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_map_to_themselves() {
        assert_eq!(map_label("PAYSLIP"), DocCategory::Payslip);
        assert_eq!(map_label("TAX_NOTICE"), DocCategory::TaxNotice);
        assert_eq!(map_label("IDENTITY"), DocCategory::Identity);
        assert_eq!(map_label("WORK_CONTRACT"), DocCategory::WorkContract);
        assert_eq!(map_label("BANK_STATEMENT"), DocCategory::BankStatement);
        assert_eq!(map_label("OTHER"), DocCategory::Other);
    }

    #[test]
    fn filenames_and_french_labels_are_recognized() {
        assert_eq!(map_label("payslip_march.pdf"), DocCategory::Payslip);
        assert_eq!(map_label("Fiche-de-Paie_2024.pdf"), DocCategory::Payslip);
        assert_eq!(map_label("Avis d'Imposition 2023.pdf"), DocCategory::TaxNotice);
        assert_eq!(map_label("CNI recto verso.jpg"), DocCategory::Identity);
        assert_eq!(map_label("Relevé bancaire.pdf"), DocCategory::BankStatement);
        assert_eq!(map_label("contrat_CDI.pdf"), DocCategory::WorkContract);
    }

    #[test]
    fn priority_order_breaks_ties() {
        // Mentions both identity and payslip; identity wins.
        assert_eq!(map_label("passport and payslip"), DocCategory::Identity);
        // Payslip outranks tax.
        assert_eq!(map_label("salary tax breakdown"), DocCategory::Payslip);
    }

    #[test]
    fn word_bounded_keywords_do_not_match_inside_words() {
        assert_eq!(map_label("scania_brochure.pdf"), DocCategory::Other);
        assert_eq!(map_label("tribune.png"), DocCategory::Other);
        assert_eq!(map_label("video.mp4"), DocCategory::Other);
    }

    #[test]
    fn empty_and_unknown_inputs_default_to_other() {
        assert_eq!(map_label(""), DocCategory::Other);
        assert_eq!(map_label("   "), DocCategory::Other);
        assert_eq!(map_label("holiday photo"), DocCategory::Other);
    }
}
