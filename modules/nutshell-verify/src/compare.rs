use nutshell_common::{Claim, ClaimValue, Discrepancy, VerificationOutcome};

use crate::extract::{contains_phrase, find_mentions, value_near, Document};

/// How one claim fared against the reference documents.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimCheck {
    Matched,
    Mismatched(Discrepancy),
    /// The metric never appears near a usable value.
    NotFound,
}

/// Relative difference against the claimed value; absolute when the claim is zero.
pub fn numeric_matches(claimed: f64, found: f64, tolerance: f64) -> bool {
    let diff = (found - claimed).abs();
    if claimed == 0.0 {
        return diff <= tolerance;
    }
    diff / claimed.abs() <= tolerance
}

fn text_matches(claimed: &str, found: &str) -> bool {
    contains_phrase(found, claimed)
}

fn values_match(claimed: &ClaimValue, found: &ClaimValue, tolerance: f64) -> bool {
    match (claimed, found) {
        (ClaimValue::Numeric(c), ClaimValue::Numeric(f)) => numeric_matches(*c, *f, tolerance),
        (ClaimValue::Text(c), ClaimValue::Text(f)) => text_matches(c, f),
        _ => false,
    }
}

/// Check one claim against one document. Any mention carrying a matching value
/// verifies the claim; otherwise the first mention's value is the discrepancy.
pub fn check_claim(claim: &Claim, document: &Document, tolerance: f64, proximity: usize) -> ClaimCheck {
    let mut first_found: Option<ClaimValue> = None;

    for mention in find_mentions(document, &claim.metric_name) {
        let Some(found) = value_near(document, mention, &claim.claimed_value, proximity) else {
            continue;
        };
        if values_match(&claim.claimed_value, &found, tolerance) {
            return ClaimCheck::Matched;
        }
        first_found.get_or_insert(found);
    }

    match first_found {
        Some(found) => ClaimCheck::Mismatched(Discrepancy {
            metric_name: claim.metric_name.clone(),
            claimed_value: claim.claimed_value.clone(),
            found_value: found,
            source_url: document.source_url.clone(),
        }),
        None => ClaimCheck::NotFound,
    }
}

/// Check one claim against every document: a match anywhere wins, then the
/// first mismatch in reference order.
pub fn check_claim_across(
    claim: &Claim,
    documents: &[Document],
    tolerance: f64,
    proximity: usize,
) -> ClaimCheck {
    let mut result = ClaimCheck::NotFound;
    for document in documents {
        match check_claim(claim, document, tolerance, proximity) {
            ClaimCheck::Matched => return ClaimCheck::Matched,
            mismatch @ ClaimCheck::Mismatched(_) if result == ClaimCheck::NotFound => {
                result = mismatch;
            }
            _ => {}
        }
    }
    result
}

/// Fold per-claim checks into the node's outcome.
pub fn aggregate(checks: Vec<ClaimCheck>) -> VerificationOutcome {
    let compared = checks.iter().filter(|c| **c != ClaimCheck::NotFound).count();
    if compared == 0 {
        return VerificationOutcome::Failed(
            "no claimed metric found in the referenced documents".into(),
        );
    }
    let discrepancies: Vec<Discrepancy> = checks
        .into_iter()
        .filter_map(|c| match c {
            ClaimCheck::Mismatched(d) => Some(d),
            _ => None,
        })
        .collect();
    if discrepancies.is_empty() {
        VerificationOutcome::Verified
    } else {
        VerificationOutcome::Discrepant(discrepancies)
    }
}
