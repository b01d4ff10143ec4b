//! Instruction and branch coverage of one method from its probes.
//!
//! Every instruction links to the instruction it is reached from without a
//! probe in between. A covered probe marks its branch of the instruction it
//! sits on, and the mark travels back along the links until it meets an
//! instruction that is already covered. Hit counts travel the whole chain,
//! so an instruction's executions are the sum over its outgoing branches.

use super::counter::Counter;
use crate::classfile::code::{Code, Insn, LabelId, Node};
use crate::classfile::opcodes::{self, GOTO};
use crate::config::ProbeMode;
use crate::data::ProbeArray;
use crate::flow::{distinct_arms, ControlFlowGraph, ProbeId, ProbeSite};
use std::collections::{BTreeSet, HashMap};

/// Coverage of one instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionCoverage {
    /// Source line, if known
    pub line: Option<u16>,
    /// Outgoing branches
    pub branches: u32,
    /// Branches recorded as taken
    pub covered_branches: u32,
    /// Recorded executions; 0 unless probes were hit counts
    pub executions: u32,
}

impl InstructionCoverage {
    /// One instruction, covered if any branch is
    #[must_use]
    pub const fn instruction_counter(&self) -> Counter {
        Counter::single(self.covered_branches > 0).with_executions(self.executions)
    }

    /// Branch counter; empty unless the instruction actually branches
    #[must_use]
    pub const fn branch_counter(&self) -> Counter {
        if self.branches > 1 {
            Counter::new(self.branches - self.covered_branches, self.covered_branches)
        } else {
            Counter::EMPTY
        }
    }
}

#[derive(Debug, Default)]
struct Instruction {
    line: Option<u16>,
    branches: u32,
    covered: BTreeSet<u32>,
    executions: u32,
    predecessor: Option<(usize, u32)>,
}

#[derive(Debug)]
struct Builder<'a> {
    probes: Option<&'a ProbeArray>,
    instructions: Vec<Instruction>,
    current: Option<usize>,
    pending: Vec<LabelId>,
    label_targets: HashMap<LabelId, usize>,
    jumps: Vec<(usize, LabelId, u32)>,
}

impl<'a> Builder<'a> {
    fn new(probes: Option<&'a ProbeArray>) -> Self {
        Self {
            probes,
            instructions: Vec::new(),
            current: None,
            pending: Vec::new(),
            label_targets: HashMap::new(),
            jumps: Vec::new(),
        }
    }

    fn add_instruction(&mut self, line: Option<u16>) -> usize {
        let index = self.instructions.len();
        self.instructions.push(Instruction {
            line,
            ..Instruction::default()
        });
        self.label_targets
            .extend(self.pending.drain(..).map(|label| (label, index)));
        if let Some(previous) = self.current {
            self.link(previous, index, 0);
        }
        self.current = Some(index);
        index
    }

    fn link(&mut self, from: usize, to: usize, branch: u32) {
        self.instructions[from].branches += 1;
        self.instructions[to].predecessor = Some((from, branch));
        let target = &self.instructions[to];
        if !target.covered.is_empty() {
            let executions = target.executions;
            self.propagate(from, branch, executions);
        }
    }

    fn add_probe(&mut self, at: usize, id: ProbeId, branch: u32) {
        self.instructions[at].branches += 1;
        let Some(probes) = self.probes else {
            return;
        };
        let hits = probes.count(id.index());
        if hits > 0 {
            let executions = if probes.mode() == ProbeMode::Count {
                hits
            } else {
                0
            };
            self.propagate(at, branch, executions);
        }
    }

    /// Bounded by the instruction count: dead code may link into a cycle
    fn propagate(&mut self, mut at: usize, mut branch: u32, executions: u32) {
        for _ in 0..self.instructions.len() {
            let insn = &mut self.instructions[at];
            let first = insn.covered.is_empty();
            let _ = insn.covered.insert(branch);
            insn.executions = insn.executions.saturating_add(executions);
            match insn.predecessor {
                Some((previous, previous_branch)) if first || executions > 0 => {
                    at = previous;
                    branch = previous_branch;
                }
                _ => break,
            }
        }
    }

    fn finish(mut self) -> Vec<InstructionCoverage> {
        for (from, label, branch) in std::mem::take(&mut self.jumps) {
            if let Some(to) = self.label_targets.get(&label).copied() {
                self.link(from, to, branch);
            }
        }
        self.instructions
            .into_iter()
            .map(|insn| InstructionCoverage {
                line: insn.line,
                branches: insn.branches,
                covered_branches: insn.covered.len() as u32,
                executions: insn.executions,
            })
            .collect()
    }
}

/// Coverage of every instruction of `code`, in program order
///
/// `probes` is the class's probe array, or `None` when nothing was recorded.
#[must_use]
pub fn method_instructions(
    code: &Code,
    cfg: &ControlFlowGraph,
    probes: Option<&ProbeArray>,
) -> Vec<InstructionCoverage> {
    let mut builder = Builder::new(probes);
    let mut line = None;
    for (index, node) in code.nodes.iter().enumerate() {
        match node {
            Node::Label(label) => {
                if let Some(ProbeSite::Fallthrough(id)) = cfg.site(index) {
                    if let Some(previous) = builder.current {
                        builder.add_probe(previous, *id, 0);
                    }
                    builder.current = None;
                }
                builder.pending.push(*label);
                if !cfg.label(*label).successor {
                    builder.current = None;
                }
            }
            Node::Line(number) => line = Some(*number),
            Node::Frame(_) => {}
            Node::Insn(insn) => {
                let at = builder.add_instruction(line);
                match (insn, cfg.site(index)) {
                    (_, Some(ProbeSite::Exit(id))) => builder.add_probe(at, *id, 0),
                    (Insn::Jump { .. }, Some(ProbeSite::Jump(id))) => builder.add_probe(at, *id, 1),
                    (Insn::Jump { target, .. }, _) => builder.jumps.push((at, *target, 1)),
                    (other, site) => {
                        if let Some((default, targets)) = other.switch_targets() {
                            let probed = match site {
                                Some(ProbeSite::Switch(arms)) => arms.as_slice(),
                                _ => &[],
                            };
                            for (branch, arm) in distinct_arms(default, &targets).into_iter().enumerate() {
                                match probed.iter().find(|(label, _)| *label == arm) {
                                    Some((_, id)) => builder.add_probe(at, *id, branch as u32),
                                    None => builder.jumps.push((at, arm, branch as u32)),
                                }
                            }
                        }
                    }
                }
                if ends_flow(insn) {
                    builder.current = None;
                }
            }
        }
    }
    builder.finish()
}

fn ends_flow(insn: &Insn) -> bool {
    match insn {
        Insn::Jump { opcode, .. } => *opcode == GOTO,
        Insn::Simple(opcode) => opcodes::is_exit(*opcode),
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::classfile::code::Handler;
    use crate::classfile::opcodes::{
        ALOAD, ASTORE, ATHROW, ICONST_0, ICONST_1, IFEQ, ILOAD, IRETURN, ISTORE, RETURN,
    };
    use crate::flow::ProbeIdGenerator;
    use crate::testing::CodeBuilder;

    fn if_without_else() -> Code {
        // 1: if (x != 0) 2: x++; 3: return
        let mut b = CodeBuilder::new();
        let end = b.new_label();
        b.label();
        b.line(1).var(ILOAD, 0).jump(IFEQ, end);
        b.line(2).iinc(0, 1);
        b.place(end).line(3).simple(RETURN);
        b.build()
    }

    fn run(code: &Code, probes: Option<&[bool]>) -> Vec<InstructionCoverage> {
        let mut ids = ProbeIdGenerator::new();
        let cfg = ControlFlowGraph::build(code, &mut ids).unwrap();
        let array = probes.map(ProbeArray::from_flags);
        method_instructions(code, &cfg, array.as_ref())
    }

    #[test]
    fn test_all_probes_cover_everything() {
        let result = run(&if_without_else(), Some(&[true, true, true]));
        assert_eq!(result.len(), 4);
        assert!(result.iter().all(|i| i.covered_branches > 0));
        assert_eq!(result[1].branch_counter(), Counter::new(0, 2));
    }

    #[test]
    fn test_no_probes_cover_nothing() {
        let result = run(&if_without_else(), None);
        assert!(result.iter().all(|i| i.covered_branches == 0));
        assert_eq!(result[1].branches, 2);
        assert_eq!(result[1].branch_counter(), Counter::new(2, 0));
    }

    #[test]
    fn test_not_taken_jump() {
        // probe 0 = jump taken, 1 = fallthrough into end, 2 = return
        let result = run(&if_without_else(), Some(&[false, true, true]));
        assert_eq!(result[0].instruction_counter(), Counter::COVERED);
        assert_eq!(result[1].branch_counter(), Counter::new(1, 1));
        assert_eq!(result[2].instruction_counter(), Counter::COVERED);
        assert_eq!(result[2].line, Some(2));
    }

    #[test]
    fn test_taken_jump_skips_body() {
        let result = run(&if_without_else(), Some(&[true, false, true]));
        assert_eq!(result[1].branch_counter(), Counter::new(1, 1));
        assert_eq!(result[2].instruction_counter(), Counter::MISSED);
        assert_eq!(result[3].instruction_counter(), Counter::COVERED);
    }

    #[test]
    fn test_straight_line_single_probe() {
        let mut b = CodeBuilder::new();
        b.label();
        b.line(1).simple(ICONST_0).var(ISTORE, 0);
        b.line(2).iinc(0, 1);
        b.line(3).simple(RETURN);
        let result = run(&b.build(), Some(&[true]));
        assert_eq!(result.len(), 4);
        assert!(result.iter().all(|i| i.instruction_counter() == Counter::COVERED));
        assert!(result.iter().all(|i| i.branch_counter() == Counter::EMPTY));
    }

    #[test]
    fn test_inlined_finally_copies_count_separately() {
        // 1: try { 2: x++; } finally { 3: x--; } 4: return
        let mut b = CodeBuilder::new();
        let after = b.new_label();
        let start = b.label();
        b.line(2).iinc(0, 1);
        let end = b.label();
        b.line(3).iinc(0, -1).jump(GOTO, after);
        let handler = b.label();
        b.line(3).var(ASTORE, 1).iinc(0, -1).var(ALOAD, 1).simple(ATHROW);
        b.place(after).line(4).simple(RETURN);
        let mut code = b.build();
        code.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type: 0,
        });

        // probe 0 = athrow, 1 = return; only the normal path ran
        let result = run(&code, Some(&[false, true]));
        assert_eq!(result.len(), 8);
        let covered: Vec<_> = result.iter().map(|i| i.covered_branches > 0).collect();
        assert_eq!(covered, [true, true, true, false, false, false, false, true]);
        assert_eq!(result[1].line, Some(3));
        assert_eq!(result[4].line, Some(3));
    }

    #[test]
    fn test_flags_carry_no_executions() {
        let result = run(&if_without_else(), Some(&[true, true, true]));
        assert!(result.iter().all(|i| i.executions == 0));
    }

    #[test]
    fn test_hit_counts_flow_back_through_branches() {
        // x == 0 on 3 calls, x != 0 on 7: the jump is taken 3 times
        let code = if_without_else();
        let mut ids = ProbeIdGenerator::new();
        let cfg = ControlFlowGraph::build(&code, &mut ids).unwrap();
        let counts = ProbeArray::from_counts(&[3, 7, 10]);
        let result = method_instructions(&code, &cfg, Some(&counts));
        let executions: Vec<u32> = result.iter().map(|i| i.executions).collect();
        assert_eq!(executions, vec![10, 10, 7, 10]);
        assert_eq!(result[1].branch_counter(), Counter::new(0, 2));
        assert_eq!(
            result[2].instruction_counter(),
            Counter::COVERED.with_executions(7)
        );
    }

    #[test]
    fn test_unexecuted_count_probe_is_missed() {
        let code = if_without_else();
        let mut ids = ProbeIdGenerator::new();
        let cfg = ControlFlowGraph::build(&code, &mut ids).unwrap();
        let counts = ProbeArray::from_counts(&[4, 0, 4]);
        let result = method_instructions(&code, &cfg, Some(&counts));
        assert_eq!(result[2].instruction_counter(), Counter::MISSED);
        assert_eq!(result[1].branch_counter(), Counter::new(1, 1));
        assert_eq!(result[0].executions, 4);
    }

    #[test]
    fn test_switch_branches() {
        // switch (x) { case 0: return 1; default: return 0; }
        let mut b = CodeBuilder::new();
        let (case, dflt) = (b.new_label(), b.new_label());
        b.label();
        b.line(1).var(ILOAD, 0).table_switch(dflt, 0, vec![case]);
        b.place(case).line(2).simple(ICONST_1).simple(IRETURN);
        b.place(dflt).line(3).simple(ICONST_0).simple(IRETURN);
        let code = b.build();
        // only the two exits carry probes; the switch arms are single-target
        let result = run(&code, Some(&[true, false]));
        assert_eq!(result[1].branches, 2);
        assert_eq!(result[1].branch_counter(), Counter::new(1, 1));
        assert_eq!(result[4].instruction_counter(), Counter::MISSED);
    }
}
