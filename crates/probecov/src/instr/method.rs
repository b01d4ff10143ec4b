//! Rewriting one method body at its probe sites.

use super::support::ProbeEmitter;
use crate::classfile::code::{Code, Insn, LabelId, Node};
use crate::classfile::constant_pool::ConstantPool;
use crate::classfile::frames::{Frame, VType};
use crate::classfile::opcodes::{self, ASTORE, GOTO};
use crate::classfile::FormatError;
use crate::flow::{ControlFlowGraph, FlowError, FlowResult, FrameTracker, ProbeId, ProbeSite};
use std::collections::HashMap;

/// Everything needed to rewrite the methods of one class
#[derive(Debug)]
pub struct MethodRewriter<'a> {
    /// Pool of the class, already holding every constant the probes use
    pub pool: &'a ConstantPool,
    /// Internal class name
    pub class_name: &'a str,
    /// Probe code generator
    pub emitter: &'a ProbeEmitter,
    /// Type of the probe array local in frames
    pub array_type: VType,
}

/// Per-method inputs
#[derive(Debug)]
pub struct MethodInput<'a> {
    /// Original body
    pub code: &'a Code,
    /// Probe sites of the body
    pub cfg: &'a ControlFlowGraph,
    /// Implicit entry frame
    pub initial: &'a Frame,
    /// Slot of the probe array local: first slot after the parameters
    pub variable: u16,
    /// Prologue pushing the probe array
    pub prologue: &'a [Insn],
    /// Stack needed by the prologue
    pub prologue_stack: u16,
    /// Whether stack map frames must be produced
    pub with_frames: bool,
}

impl MethodRewriter<'_> {
    /// Produce the instrumented body
    pub fn rewrite(&self, input: &MethodInput<'_>) -> FlowResult<Code> {
        let code = input.code;
        let variable = input.variable;
        let mut out = code.clone();
        out.max_stack = code.max_stack.saturating_add(3).max(input.prologue_stack);
        out.max_locals = code.max_locals.saturating_add(1);
        out.nodes = Vec::with_capacity(code.nodes.len() + 8 * input.cfg.probe_count() as usize);

        let mut try_labels: HashMap<LabelId, LabelId> = HashMap::new();
        for start in input.cfg.try_probe_starts() {
            let _ = try_labels.insert(*start, out.new_label());
        }
        for handler in &mut out.handlers {
            if let Some(label) = try_labels.get(&handler.start) {
                handler.start = *label;
            }
        }
        for local in out
            .local_variables
            .iter_mut()
            .chain(out.local_variable_types.iter_mut())
        {
            local.index = shift(local.index, variable);
        }

        out.nodes
            .extend(input.prologue.iter().cloned().map(Node::Insn));
        out.nodes.push(Node::Insn(Insn::Var {
            opcode: ASTORE,
            var: variable,
        }));

        let mut tracker = if input.with_frames {
            Some(FrameTracker::new(self.pool, self.class_name, input.initial, code)?)
        } else {
            None
        };
        let mut last_label: Option<LabelId> = None;

        for (index, node) in code.nodes.iter().enumerate() {
            match node {
                Node::Label(label) => {
                    if let Some(ProbeSite::Fallthrough(id)) = input.cfg.site(index) {
                        if let Some(start) = try_labels.get(label) {
                            out.nodes.push(Node::Label(*start));
                        }
                        self.probe(&mut out.nodes, variable, *id)?;
                    }
                    out.nodes.push(node.clone());
                    last_label = Some(*label);
                }
                Node::Line(_) => out.nodes.push(node.clone()),
                Node::Frame(frame) => {
                    out.nodes.push(Node::Frame(self.remap_frame(frame, variable)));
                    if let Some(tracker) = tracker.as_mut() {
                        tracker.visit(node, None)?;
                    }
                }
                Node::Insn(insn) => {
                    let insn = remap_insn(insn, variable);
                    match input.cfg.site(index) {
                        Some(ProbeSite::Exit(id)) => {
                            self.probe(&mut out.nodes, variable, *id)?;
                            out.nodes.push(Node::Insn(insn));
                        }
                        Some(ProbeSite::Jump(id)) => {
                            let frame = self.frame_after(
                                tracker.as_ref(),
                                input.cfg,
                                &code.nodes,
                                index,
                                opcodes::jump_pop_count(insn.opcode()),
                                variable,
                            )?;
                            self.jump_with_probe(&mut out, insn, *id, frame, variable)?;
                        }
                        Some(ProbeSite::Switch(arms)) => {
                            let frame = if input.with_frames {
                                Some(self.required_frame(tracker.as_ref(), 1, variable)?)
                            } else {
                                None
                            };
                            self.switch_with_probes(&mut out, insn, arms, frame, variable)?;
                        }
                        Some(ProbeSite::Fallthrough(_)) | None => out.nodes.push(Node::Insn(insn)),
                    }
                    if let Some(tracker) = tracker.as_mut() {
                        tracker.visit(node, last_label)?;
                    }
                    last_label = None;
                }
            }
        }
        Ok(out)
    }

    fn probe(&self, nodes: &mut Vec<Node>, variable: u16, id: ProbeId) -> FlowResult<()> {
        Ok(self.emitter.emit(variable, id, nodes)?)
    }

    /// `if<inverted> skip; probe; goto target; skip: [frame]`
    fn jump_with_probe(
        &self,
        out: &mut Code,
        insn: Insn,
        id: ProbeId,
        frame: Option<Frame>,
        variable: u16,
    ) -> FlowResult<()> {
        let Insn::Jump { opcode, target } = insn else {
            return Err(FormatError::new("jump probe on a non-jump instruction").into());
        };
        if opcode == GOTO {
            self.probe(&mut out.nodes, variable, id)?;
            out.nodes.push(Node::Insn(insn));
            return Ok(());
        }
        let inverted = opcodes::inverted_jump(opcode)
            .ok_or_else(|| FormatError::new(format!("opcode {opcode} cannot be inverted")))?;
        let skip = out.new_label();
        out.nodes.push(Node::Insn(Insn::Jump {
            opcode: inverted,
            target: skip,
        }));
        self.probe(&mut out.nodes, variable, id)?;
        out.nodes.push(Node::Insn(Insn::Jump {
            opcode: GOTO,
            target,
        }));
        out.nodes.push(Node::Label(skip));
        if let Some(frame) = frame {
            out.nodes.push(Node::Frame(frame));
        }
        Ok(())
    }

    /// Switch whose probed arms go through `Li: [frame]; probe; goto arm`
    fn switch_with_probes(
        &self,
        out: &mut Code,
        insn: Insn,
        arms: &[(LabelId, ProbeId)],
        frame: Option<Frame>,
        variable: u16,
    ) -> FlowResult<()> {
        let intermediates: Vec<(LabelId, LabelId, ProbeId)> = arms
            .iter()
            .map(|(label, id)| (*label, out.new_label(), *id))
            .collect();
        let redirect = |label: LabelId| {
            intermediates
                .iter()
                .find(|(original, _, _)| *original == label)
                .map_or(label, |(_, intermediate, _)| *intermediate)
        };
        let switch = match insn {
            Insn::TableSwitch {
                default,
                low,
                targets,
            } => Insn::TableSwitch {
                default: redirect(default),
                low,
                targets: targets.into_iter().map(redirect).collect(),
            },
            Insn::LookupSwitch { default, pairs } => Insn::LookupSwitch {
                default: redirect(default),
                pairs: pairs.into_iter().map(|(k, l)| (k, redirect(l))).collect(),
            },
            _ => return Err(FormatError::new("switch probe on a non-switch instruction").into()),
        };
        out.nodes.push(Node::Insn(switch));
        for (label, intermediate, id) in intermediates {
            out.nodes.push(Node::Label(intermediate));
            if let Some(frame) = &frame {
                out.nodes.push(Node::Frame(frame.clone()));
            }
            self.probe(&mut out.nodes, variable, id)?;
            out.nodes.push(Node::Insn(Insn::Jump {
                opcode: GOTO,
                target: label,
            }));
        }
        Ok(())
    }

    /// Frame for the label right after a rewritten conditional jump
    ///
    /// A frame declared at the same position wins, so only one frame ends up
    /// there. A fallthrough probe emitted before the next label moves the
    /// declared frame past the probe code, leaving the skip label bare.
    fn frame_after(
        &self,
        tracker: Option<&FrameTracker<'_>>,
        cfg: &ControlFlowGraph,
        nodes: &[Node],
        index: usize,
        pops: usize,
        variable: u16,
    ) -> FlowResult<Option<Frame>> {
        if tracker.is_none() {
            return Ok(None);
        }
        let mut declared = false;
        for (position, node) in nodes.iter().enumerate().skip(index + 1) {
            match node {
                Node::Label(_) if matches!(cfg.site(position), Some(ProbeSite::Fallthrough(_))) => {
                    break
                }
                Node::Label(_) | Node::Line(_) => {}
                Node::Frame(_) => {
                    declared = true;
                    break;
                }
                Node::Insn(_) => break,
            }
        }
        if declared {
            return Ok(None);
        }
        self.required_frame(tracker, pops, variable).map(Some)
    }

    fn required_frame(
        &self,
        tracker: Option<&FrameTracker<'_>>,
        pops: usize,
        variable: u16,
    ) -> FlowResult<Frame> {
        let frame = tracker
            .and_then(|t| t.frame(pops))
            .ok_or_else(|| FlowError::Format(FormatError::new("no frame at inserted label")))?;
        Ok(self.remap_frame(&frame, variable))
    }

    /// Insert the probe array type at slot `variable`, padding with `Top`
    fn remap_frame(&self, frame: &Frame, variable: u16) -> Frame {
        let mut locals = Vec::with_capacity(frame.locals.len() + 2);
        let mut existing = frame.locals.iter();
        let mut remaining = frame.locals.len();
        let mut position = 0u16;
        while remaining > 0 || position <= variable {
            if position == variable {
                locals.push(self.array_type.clone());
                position += 1;
            } else if let Some(vtype) = existing.next() {
                remaining -= 1;
                position += if vtype.is_wide() { 2 } else { 1 };
                locals.push(vtype.clone());
            } else {
                locals.push(VType::Top);
                position += 1;
            }
        }
        Frame {
            locals,
            stack: frame.stack.clone(),
        }
    }
}

const fn shift(var: u16, variable: u16) -> u16 {
    if var >= variable {
        var + 1
    } else {
        var
    }
}

fn remap_insn(insn: &Insn, variable: u16) -> Insn {
    match insn {
        Insn::Var { opcode, var } => Insn::Var {
            opcode: *opcode,
            var: shift(*var, variable),
        },
        Insn::Iinc { var, incr } => Insn::Iinc {
            var: shift(*var, variable),
            incr: *incr,
        },
        other => other.clone(),
    }
}
