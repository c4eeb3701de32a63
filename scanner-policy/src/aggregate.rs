//! Merging of per-group findings into one scored analysis.

use std::cmp::{Ordering, Reverse};
use std::collections::BTreeSet;

use scanner_primitives::{
    AnalysisFragment, AttackChain, CompositionAnalysis, CompositionSurplus, SeverityHistogram,
    ToolRef, union_lines,
};
use tracing::debug;

use crate::decision::decide;
use crate::risk::{PolicyResult, RiskPolicy};

/// Merges fragments and scores the result under a [`RiskPolicy`].
///
/// Merging is a pure set operation: the output does not depend on the order
/// fragments arrive in, and merging an already merged analysis with itself
/// changes nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Aggregator {
    policy: RiskPolicy,
}

impl Aggregator {
    /// Creates an aggregator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::PolicyError::InvalidPolicy`] if the policy parameters
    /// are unusable.
    pub fn new(policy: RiskPolicy) -> PolicyResult<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    /// Returns the configured risk policy.
    #[must_use]
    pub const fn policy(&self) -> RiskPolicy {
        self.policy
    }

    /// Merges fragments and scores the merged findings.
    #[must_use]
    pub fn merge<I>(&self, fragments: I) -> CompositionAnalysis
    where
        I: IntoIterator<Item = AnalysisFragment>,
    {
        let merged = merge_fragments(fragments);
        let histogram = SeverityHistogram::from_surpluses(&merged.surpluses);
        let risk = self.policy.score(&histogram);
        let (action, rationale, constraints) = decide(&merged.surpluses).into_parts();
        debug!(
            surpluses = merged.surpluses.len(),
            attack_chains = merged.attack_chains.len(),
            critical = histogram.critical,
            risk = %risk,
            action = %action,
            "scored merged findings"
        );
        CompositionAnalysis::new(merged, risk, action, constraints).with_rationale(rationale)
    }

    /// Normalizes and scores a single fragment.
    #[must_use]
    pub fn score(&self, fragment: AnalysisFragment) -> CompositionAnalysis {
        self.merge([fragment])
    }

    /// Re-merges previously scored analyses.
    #[must_use]
    pub fn remerge<'a, I>(&self, analyses: I) -> CompositionAnalysis
    where
        I: IntoIterator<Item = &'a CompositionAnalysis>,
    {
        self.merge(analyses.into_iter().map(CompositionAnalysis::to_fragment))
    }
}

/// Unions fragments without scoring them.
///
/// Capability vectors are unioned per tool. Duplicate surpluses (same tool set
/// and class) are folded with [`CompositionSurplus::absorb`]. Duplicate chains
/// (same name and step tools) keep the higher severity. Both lists come out
/// sorted by descending severity. Blind spots are unioned and sorted; the
/// cross-server summaries are unioned line by line.
#[must_use]
pub fn merge_fragments<I>(fragments: I) -> AnalysisFragment
where
    I: IntoIterator<Item = AnalysisFragment>,
{
    let mut merged = AnalysisFragment::default();
    let mut blind_spots = BTreeSet::new();
    let mut summaries = Vec::new();
    for fragment in fragments {
        merged.capability_vectors.merge_all(&fragment.capability_vectors);
        blind_spots.extend(
            fragment
                .governance_blind_spots
                .iter()
                .map(|spot| spot.trim().to_owned())
                .filter(|spot| !spot.is_empty()),
        );
        summaries.extend(fragment.cross_server_risk_summary);
        for surplus in fragment.surpluses {
            match merged.surpluses.iter_mut().find(|known| known.is_duplicate_of(&surplus)) {
                Some(known) => known.absorb(surplus),
                None => merged.surpluses.push(surplus),
            }
        }
        for chain in fragment.attack_chains {
            match merged.attack_chains.iter_mut().find(|known| known.is_duplicate_of(&chain)) {
                Some(known) => {
                    if chain_preference(&chain, known) == Ordering::Less {
                        *known = chain;
                    }
                }
                None => merged.attack_chains.push(chain),
            }
        }
    }
    merged.surpluses.sort_by(surplus_order);
    merged.attack_chains.sort_by(chain_order);
    merged.governance_blind_spots = blind_spots.into_iter().collect();
    let summary = union_lines(summaries.iter().map(String::as_str));
    merged.cross_server_risk_summary = (!summary.is_empty()).then_some(summary);
    merged
}

fn surplus_order(a: &CompositionSurplus, b: &CompositionSurplus) -> Ordering {
    (Reverse(a.severity()), a.involved_set(), a.capability_class()).cmp(&(
        Reverse(b.severity()),
        b.involved_set(),
        b.capability_class(),
    ))
}

fn chain_tools(chain: &AttackChain) -> Vec<&ToolRef> {
    chain.steps().iter().map(|step| step.tool()).collect()
}

fn chain_order(a: &AttackChain, b: &AttackChain) -> Ordering {
    (Reverse(a.severity()), a.name(), chain_tools(a)).cmp(&(
        Reverse(b.severity()),
        b.name(),
        chain_tools(b),
    ))
}

/// Total order between duplicate chains; `Less` wins.
fn chain_preference(a: &AttackChain, b: &AttackChain) -> Ordering {
    type Detail<'a> = (Vec<&'a str>, Option<&'a str>, Option<&'a str>, Option<&'a str>, &'a [String]);
    fn detail(chain: &AttackChain) -> Detail<'_> {
        (
            chain.steps().iter().map(|step| step.intent()).collect(),
            chain.human_approval_bypass(),
            chain.mitigation(),
            chain.final_capability(),
            chain.surpluses_used(),
        )
    }
    Reverse(a.severity())
        .cmp(&Reverse(b.severity()))
        .then_with(|| detail(a).cmp(&detail(b)))
}

#[cfg(test)]
mod tests {
    use scanner_primitives::{
        AttackStep, CapabilityClass, CapabilityMap, CapabilityVector, GovernanceAction, RiskScore,
        Severity,
    };

    use super::*;

    fn tool(server: &str, name: &str) -> ToolRef {
        ToolRef::parse(server, name).unwrap()
    }

    fn surplus(
        a: &ToolRef,
        b: &ToolRef,
        class: CapabilityClass,
        severity: Severity,
        gap: &str,
    ) -> CompositionSurplus {
        CompositionSurplus::builder([a.clone(), b.clone()], class)
            .severity(severity)
            .emergent_capability(format!("{severity:?} emergent"))
            .governance_gap(gap)
            .build()
            .unwrap()
    }

    fn chain(a: &ToolRef, b: &ToolRef, severity: Severity) -> AttackChain {
        AttackChain::new(
            "harvest then spend",
            vec![AttackStep::new(a.clone(), "read"), AttackStep::new(b.clone(), "buy")],
            severity,
        )
        .unwrap()
    }

    fn vectors(tool: &ToolRef, class: CapabilityClass) -> CapabilityMap {
        std::iter::once((tool.clone(), CapabilityVector::from_iter([class]))).collect()
    }

    fn fragments() -> Vec<AnalysisFragment> {
        let secret = tool("ServerA", "get_secret_word");
        let cart = tool("ServerB", "update_cart");
        let file = tool("ServerC", "read_file");
        vec![
            AnalysisFragment {
                capability_vectors: vectors(&secret, CapabilityClass::CredentialAccess),
                surpluses: vec![surplus(
                    &secret,
                    &cart,
                    CapabilityClass::FinancialTransaction,
                    Severity::High,
                    "reviewed per server",
                )],
                attack_chains: vec![chain(&secret, &cart, Severity::High)],
                governance_blind_spots: vec!["cart review ignores where coupons come from".to_owned()],
                cross_server_risk_summary: Some("secrets flow into purchases".to_owned()),
            },
            AnalysisFragment {
                capability_vectors: vectors(&secret, CapabilityClass::ReadData),
                surpluses: vec![surplus(
                    &secret,
                    &cart,
                    CapabilityClass::FinancialTransaction,
                    Severity::Critical,
                    "no cross-server review",
                )],
                attack_chains: vec![chain(&secret, &cart, Severity::Critical)],
                governance_blind_spots: vec![
                    "secret tools are reviewed as read-only".to_owned(),
                    "cart review ignores where coupons come from".to_owned(),
                ],
                cross_server_risk_summary: Some(
                    "secrets flow into purchases\nno server sees both halves".to_owned(),
                ),
            },
            AnalysisFragment {
                capability_vectors: vectors(&file, CapabilityClass::ReadData),
                surpluses: vec![surplus(
                    &file,
                    &cart,
                    CapabilityClass::Messaging,
                    Severity::Low,
                    "noisy",
                )],
                ..AnalysisFragment::default()
            },
        ]
    }

    #[test]
    fn duplicates_fold_into_the_higher_severity() {
        let analysis = Aggregator::default().merge(fragments());

        assert_eq!(analysis.surpluses().len(), 2);
        let top = &analysis.surpluses()[0];
        assert_eq!(top.severity(), Severity::Critical);
        assert_eq!(top.governance_gap(), "no cross-server review\nreviewed per server");
        assert_eq!(analysis.attack_chains().len(), 1);
        assert_eq!(analysis.attack_chains()[0].severity(), Severity::Critical);

        let secret = analysis
            .capability_vectors()
            .get(&tool("ServerA", "get_secret_word"))
            .unwrap();
        assert!(secret.contains(&CapabilityClass::CredentialAccess));
        assert!(secret.contains(&CapabilityClass::ReadData));
    }

    #[test]
    fn blind_spots_and_summaries_are_unioned() {
        let analysis = Aggregator::default().merge(fragments());
        assert_eq!(
            analysis.governance_blind_spots(),
            [
                "cart review ignores where coupons come from",
                "secret tools are reviewed as read-only",
            ]
        );
        assert_eq!(
            analysis.cross_server_risk_summary(),
            Some("no server sees both halves\nsecrets flow into purchases")
        );
        assert_eq!(analysis.rationale(), Some("1 critical composition surplus(es)"));
    }

    #[test]
    fn merge_ignores_fragment_order() {
        let aggregator = Aggregator::default();
        let forward = aggregator.merge(fragments());
        let mut reversed = fragments();
        reversed.reverse();
        let backward = aggregator.merge(reversed);
        let mut rotated = fragments();
        rotated.rotate_left(1);
        let rotated = aggregator.merge(rotated);

        assert_eq!(forward, backward);
        assert_eq!(forward, rotated);
    }

    #[test]
    fn merge_is_idempotent() {
        let aggregator = Aggregator::default();
        let once = aggregator.merge(fragments());
        let twice = aggregator.remerge([&once, &once]);
        assert_eq!(once, twice);
    }

    #[test]
    fn critical_surplus_blocks_with_one_constraint() {
        let analysis = Aggregator::default().merge(fragments().into_iter().take(2));
        assert_eq!(analysis.risk_score(), RiskScore::Critical);
        assert_eq!(analysis.recommended_action(), GovernanceAction::Block);
        assert_eq!(analysis.constraints().len(), 1);
        assert!(analysis.constraints()[0].contains("`ServerA/get_secret_word`"));
    }

    #[test]
    fn empty_merge_allows() {
        let analysis = Aggregator::default().merge(Vec::new());
        assert_eq!(analysis.risk_score(), RiskScore::None);
        assert_eq!(analysis.recommended_action(), GovernanceAction::Allow);
        assert!(analysis.constraints().is_empty());
    }

    #[test]
    fn weighted_policy_escalates_without_blocking() {
        let aggregator = Aggregator::new(RiskPolicy::WeightedCount {
            low_weight: 1,
            medium_weight: 2,
            escalate_at: 2,
        })
        .unwrap();
        let low_only = fragments().pop().unwrap();
        let doubled = AnalysisFragment {
            surpluses: vec![
                low_only.surpluses[0].clone(),
                surplus(
                    &tool("ServerC", "read_file"),
                    &tool("ServerA", "get_secret_word"),
                    CapabilityClass::Messaging,
                    Severity::Low,
                    "noisy",
                ),
            ],
            ..AnalysisFragment::default()
        };

        assert_eq!(aggregator.score(low_only).risk_score(), RiskScore::Low);
        let escalated = aggregator.score(doubled);
        assert_eq!(escalated.risk_score(), RiskScore::High);
        assert_eq!(escalated.recommended_action(), GovernanceAction::AllowWithConstraints);
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let policy = RiskPolicy::WeightedCount {
            low_weight: 1,
            medium_weight: 1,
            escalate_at: 0,
        };
        assert!(Aggregator::new(policy).is_err());
    }
}
