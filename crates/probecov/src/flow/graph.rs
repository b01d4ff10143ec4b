//! Probe placement over a method body.

use super::ids::{ProbeId, ProbeIdGenerator};
use super::labels::{LabelFlow, LabelInfo};
use super::FlowResult;
use crate::classfile::code::{Code, Insn, LabelId, Node};
use crate::classfile::opcodes;
use std::collections::BTreeMap;
use std::ops::Range;

/// Where a probe records an edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSite {
    /// Sequential entry into a label that needs a probe; sits before the label
    Fallthrough(ProbeId),
    /// Before a return or `athrow`
    Exit(ProbeId),
    /// On the taken edge of a jump to a multi-target label
    Jump(ProbeId),
    /// One probe per distinct multi-target switch arm, default first
    Switch(Vec<(LabelId, ProbeId)>),
}

/// Label flags plus probe sites of one method
///
/// Sites are keyed by node index in the body the graph was built from.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    flow: LabelFlow,
    sites: BTreeMap<usize, ProbeSite>,
    try_probe_starts: Vec<LabelId>,
    probe_ids: Range<u32>,
}

impl ControlFlowGraph {
    /// Place probes, drawing ids from the class-wide generator
    pub fn build(code: &Code, ids: &mut ProbeIdGenerator) -> FlowResult<Self> {
        let flow = LabelFlow::analyze(code)?;
        let first = ids.count();
        let mut sites = BTreeMap::new();

        for (index, node) in code.nodes.iter().enumerate() {
            let site = match node {
                Node::Label(label) if flow.info(*label).needs_probe() => {
                    Some(ProbeSite::Fallthrough(ids.next_id()))
                }
                Node::Insn(Insn::Simple(opcode)) if opcodes::is_exit(*opcode) => {
                    Some(ProbeSite::Exit(ids.next_id()))
                }
                Node::Insn(Insn::Jump { target, .. }) if flow.info(*target).multi_target => {
                    Some(ProbeSite::Jump(ids.next_id()))
                }
                Node::Insn(insn) => insn.switch_targets().and_then(|(default, targets)| {
                    let arms: Vec<_> = distinct_arms(default, &targets)
                        .into_iter()
                        .filter(|label| flow.info(*label).multi_target)
                        .map(|label| (label, ids.next_id()))
                        .collect();
                    (!arms.is_empty()).then_some(ProbeSite::Switch(arms))
                }),
                _ => None,
            };
            if let Some(site) = site {
                let _ = sites.insert(index, site);
            }
        }

        let mut try_probe_starts: Vec<LabelId> = code
            .handlers
            .iter()
            .map(|h| h.start)
            .filter(|start| flow.info(*start).needs_probe())
            .collect();
        try_probe_starts.sort_unstable();
        try_probe_starts.dedup();

        Ok(Self {
            flow,
            sites,
            try_probe_starts,
            probe_ids: first..ids.count(),
        })
    }

    /// Site attached to the node at `index`
    #[must_use]
    pub fn site(&self, index: usize) -> Option<&ProbeSite> {
        self.sites.get(&index)
    }

    /// All sites in program order
    pub fn sites(&self) -> impl Iterator<Item = (usize, &ProbeSite)> {
        self.sites.iter().map(|(index, site)| (*index, site))
    }

    /// Flow flags of a label
    #[must_use]
    pub fn label(&self, label: LabelId) -> LabelInfo {
        self.flow.info(label)
    }

    /// Probe ids owned by this method
    #[must_use]
    pub fn probe_ids(&self) -> Range<u32> {
        self.probe_ids.clone()
    }

    /// Number of probes in this method
    #[must_use]
    pub fn probe_count(&self) -> u32 {
        self.probe_ids.end - self.probe_ids.start
    }

    /// Try-range starts that also carry a fallthrough probe
    #[must_use]
    pub fn try_probe_starts(&self) -> &[LabelId] {
        &self.try_probe_starts
    }
}

/// Distinct switch labels, default first, in case order
#[must_use]
pub fn distinct_arms(default: LabelId, targets: &[LabelId]) -> Vec<LabelId> {
    let mut arms = vec![default];
    for label in targets {
        if !arms.contains(label) {
            arms.push(*label);
        }
    }
    arms
}
