//! Label flow pass: how each label of a method body can be reached.

use super::{FlowError, FlowResult};
use crate::classfile::code::{Code, Insn, LabelId, Node};
use crate::classfile::opcodes::{self, GOTO, JSR, RET};

/// Reachability flags of one label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelInfo {
    /// Reached by a jump, switch, handler, or as method entry
    pub target: bool,
    /// Reached by falling through from the previous instruction
    pub successor: bool,
    /// Reached along more than one edge
    pub multi_target: bool,
    /// Starts a source line that invokes a method
    pub method_invocation_line: bool,
}

impl LabelInfo {
    /// A probe is needed when the label is reached sequentially and the
    /// incoming edge cannot be inferred from another probe
    #[must_use]
    pub const fn needs_probe(&self) -> bool {
        self.successor && (self.multi_target || self.method_invocation_line)
    }

    fn set_target(&mut self) {
        if self.target || self.successor {
            self.multi_target = true;
        } else {
            self.target = true;
        }
    }

    fn set_successor(&mut self) {
        self.successor = true;
        if self.target {
            self.multi_target = true;
        }
    }
}

/// Flags for every label of a body, indexed by [`LabelId::index`]
#[derive(Debug, Clone, Default)]
pub struct LabelFlow {
    infos: Vec<LabelInfo>,
}

impl LabelFlow {
    /// Run the pass over a method body
    pub fn analyze(code: &Code) -> FlowResult<Self> {
        let mut flow = Self {
            infos: vec![LabelInfo::default(); code.label_count() as usize],
        };
        for handler in &code.handlers {
            flow.info_mut(handler.start).set_target();
            flow.info_mut(handler.handler).set_target();
        }

        let mut successor = false;
        let mut first = true;
        let mut line_start: Option<LabelId> = None;
        let mut last_label: Option<LabelId> = None;
        for node in &code.nodes {
            match node {
                Node::Label(label) => {
                    if first {
                        flow.info_mut(*label).set_target();
                    }
                    if successor {
                        flow.info_mut(*label).set_successor();
                    }
                    last_label = Some(*label);
                }
                Node::Line(_) => line_start = last_label,
                Node::Frame(_) => {}
                Node::Insn(insn) => {
                    successor = flow.visit_insn(insn, line_start)?;
                    first = false;
                    last_label = None;
                }
            }
        }
        Ok(flow)
    }

    /// Returns whether the next instruction is reached sequentially
    fn visit_insn(&mut self, insn: &Insn, line_start: Option<LabelId>) -> FlowResult<bool> {
        match insn {
            Insn::Jump { opcode, target } => {
                if *opcode == JSR {
                    return Err(FlowError::Subroutine);
                }
                self.info_mut(*target).set_target();
                Ok(*opcode != GOTO)
            }
            Insn::Var { opcode: RET, .. } => Err(FlowError::Subroutine),
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                if let Some((default, targets)) = insn.switch_targets() {
                    let mut done = vec![default];
                    self.info_mut(default).set_target();
                    for label in targets {
                        if !done.contains(&label) {
                            done.push(label);
                            self.info_mut(label).set_target();
                        }
                    }
                }
                Ok(false)
            }
            Insn::Simple(opcode) if opcodes::is_exit(*opcode) => Ok(false),
            Insn::Method { .. } | Insn::Interface { .. } | Insn::Dynamic { .. } => {
                if let Some(start) = line_start {
                    self.info_mut(start).method_invocation_line = true;
                }
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    fn info_mut(&mut self, label: LabelId) -> &mut LabelInfo {
        if label.index() >= self.infos.len() {
            self.infos.resize(label.index() + 1, LabelInfo::default());
        }
        &mut self.infos[label.index()]
    }

    /// Flags of a label (all false for unknown labels)
    #[must_use]
    pub fn info(&self, label: LabelId) -> LabelInfo {
        self.infos.get(label.index()).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::classfile::code::Handler;
    use crate::testing::CodeBuilder;
    use crate::classfile::opcodes::*;

    #[test]
    fn test_if_without_else() {
        // L0: iload_0; ifeq L1; iinc; L1: return
        let mut b = CodeBuilder::new();
        let l0 = b.label();
        let l1 = b.new_label();
        b.line(1).var(ILOAD, 0).jump(IFEQ, l1).line(2).iinc(0, 1);
        b.place(l1).line(3).simple(RETURN);
        let code = b.build();
        let flow = LabelFlow::analyze(&code).unwrap();

        assert!(flow.info(l0).target);
        assert!(!flow.info(l0).needs_probe());
        let end = flow.info(l1);
        assert!(end.target && end.successor && end.multi_target);
        assert!(end.needs_probe());
    }

    #[test]
    fn test_goto_target_is_single() {
        let mut b = CodeBuilder::new();
        let l1 = b.new_label();
        b.label();
        b.jump(GOTO, l1);
        b.place(l1).simple(RETURN);
        let flow = LabelFlow::analyze(&b.build()).unwrap();
        let info = flow.info(l1);
        assert!(info.target && !info.successor && !info.multi_target);
    }

    #[test]
    fn test_invocation_line_flag() {
        let mut b = CodeBuilder::new();
        b.label();
        b.line(1).simple(NOP);
        let l1 = b.label();
        b.line(2).invoke_static("a/B", "run", "()V").simple(RETURN);
        let flow = LabelFlow::analyze(&b.build()).unwrap();
        let info = flow.info(l1);
        assert!(info.successor && info.method_invocation_line);
        assert!(info.needs_probe());
    }

    #[test]
    fn test_handler_targets() {
        let mut b = CodeBuilder::new();
        let start = b.label();
        b.simple(NOP);
        let end = b.label();
        b.simple(RETURN);
        let handler = b.label();
        b.simple(ATHROW);
        let mut code = b.build();
        code.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type: 0,
        });
        let flow = LabelFlow::analyze(&code).unwrap();
        assert!(flow.info(start).multi_target);
        assert!(flow.info(handler).target);
        assert!(!flow.info(handler).successor);
    }

    #[test]
    fn test_jsr_rejected() {
        let mut b = CodeBuilder::new();
        let l1 = b.new_label();
        b.label();
        b.jump(JSR, l1);
        b.place(l1).simple(RETURN);
        assert_eq!(
            LabelFlow::analyze(&b.build()).unwrap_err(),
            FlowError::Subroutine
        );
    }
}
