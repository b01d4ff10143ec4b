//! Decoding of every method body of a class, with probes placed.

use super::{ControlFlowGraph, FlowError, ProbeIdGenerator};
use crate::classfile::access::STATIC;
use crate::classfile::code::Code;
use crate::classfile::descriptor::MethodDescriptor;
use crate::classfile::frames::Frame;
use crate::classfile::{ClassFile, FormatError};
use crate::result::{CoverageError, CoverageResult};

/// A method with code, decoded and probed
#[derive(Debug, Clone)]
pub struct MethodPlan {
    /// Position in the class's method table
    pub index: usize,
    /// Position of the `Code` attribute among the method's attributes
    pub attribute: usize,
    /// Access flags
    pub access: u16,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Decoded body
    pub code: Code,
    /// Probe placement
    pub cfg: ControlFlowGraph,
    /// Frame at method entry
    pub initial: Frame,
    /// First local slot after the parameters
    pub variable: u16,
}

/// Decode every method body and place its probes, in declaration order
///
/// Methods without code are skipped and draw no ids.
pub fn plan_methods(
    class: &ClassFile,
    class_name: &str,
    ids: &mut ProbeIdGenerator,
) -> CoverageResult<Vec<MethodPlan>> {
    let malformed = |e: FormatError| CoverageError::malformed(class_name, e);
    let mut plans = Vec::new();
    for (index, member) in class.methods.iter().enumerate() {
        let Some(attribute) = class.attribute_position(&member.attributes, "Code") else {
            continue;
        };
        let name = class.member_name(member).map_err(malformed)?;
        let descriptor = class.member_descriptor(member).map_err(malformed)?;
        let parsed = MethodDescriptor::parse(&descriptor).map_err(malformed)?;
        let initial = Frame::initial(class_name, member.access, &name, &parsed);
        let code = Code::parse(&member.attributes[attribute].info, &class.pool, &initial)
            .map_err(malformed)?;
        let cfg = ControlFlowGraph::build(&code, ids).map_err(|e| flow_error(class_name, e))?;
        let variable = u16::from(member.access & STATIC == 0) + parsed.param_slots();
        plans.push(MethodPlan {
            index,
            attribute,
            access: member.access,
            name,
            descriptor,
            code,
            cfg,
            initial,
            variable,
        });
    }
    Ok(plans)
}

/// Error for a flow failure in class `class_name`
#[must_use]
pub fn flow_error(class_name: &str, err: FlowError) -> CoverageError {
    match err {
        FlowError::Subroutine => CoverageError::unsupported(class_name, err),
        FlowError::Format(format) => CoverageError::malformed(class_name, format),
    }
}
