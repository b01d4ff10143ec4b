//! Offline instrumentation of class files.
//!
//! [`Instrumenter::instrument`] parses a class, places probes with the same
//! control-flow pass the analyzer uses, selects a [`Strategy`] for the probe
//! array and writes the rewritten class (plus a companion class when the
//! strategy needs one).

pub mod accessor;
pub mod method;
pub mod strategy;
pub mod support;

pub use accessor::{AccessorGenerator, OfflineAccessor};
pub use strategy::{select, ProbeArrayLoad, Strategy, UnitInfo, UnitKind};

use crate::archive::{is_signature_entry, read_entries, write_entries, ArchiveEntry, ContentType};
use crate::classfile::frames::VType;
use crate::classfile::{ClassFile, FormatError, FRAMES_MAJOR_VERSION};
use crate::config::InstrumentConfig;
use crate::data::class_id;
use crate::flow::{flow_error, plan_methods, ProbeIdGenerator};
use crate::result::{CoverageError, CoverageResult};
use method::{MethodInput, MethodRewriter};
use serde::{Deserialize, Serialize};
use support::{is_instrumented, ProbeEmitter, CLINIT, COMPANION_SUFFIX};
use tracing::debug;

/// A generated class to be defined next to the instrumented one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanionUnit {
    /// Internal class name
    pub name: String,
    /// Class file bytes
    pub bytes: Vec<u8>,
}

/// Result of instrumenting one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedUnit {
    /// Rewritten class, or the input bytes when there is nothing to probe
    pub bytes: Vec<u8>,
    /// Id of the original bytes
    pub class_id: u64,
    /// Number of probes
    pub probe_count: u32,
    /// How the probe array is attached
    pub strategy: Strategy,
    /// Companion class, for [`Strategy::ExternalCompanion`]
    pub companion: Option<CompanionUnit>,
}

/// Result of instrumenting a jar or zip archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentedArchive {
    /// Rewritten archive
    pub bytes: Vec<u8>,
    /// Classes instrumented, nested archives included
    pub classes: usize,
    /// Probes across all those classes
    pub probe_count: u64,
}

/// Rewrites classes to record execution into probe arrays
#[derive(Debug)]
pub struct Instrumenter {
    config: InstrumentConfig,
    accessor: Box<dyn AccessorGenerator>,
}

impl Default for Instrumenter {
    fn default() -> Self {
        Self::new(InstrumentConfig::default())
    }
}

impl Instrumenter {
    /// Instrumenter using the offline runtime accessor
    #[must_use]
    pub fn new(config: InstrumentConfig) -> Self {
        let accessor = Box::new(OfflineAccessor::new(&config));
        Self { config, accessor }
    }

    /// Instrumenter with a custom accessor
    #[must_use]
    pub fn with_accessor(config: InstrumentConfig, accessor: Box<dyn AccessorGenerator>) -> Self {
        Self { config, accessor }
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Instrument one class; `name` is used in error messages
    pub fn instrument(&self, bytes: &[u8], name: &str) -> CoverageResult<InstrumentedUnit> {
        let id = class_id(bytes);
        let mut class = ClassFile::parse(bytes).map_err(|e| CoverageError::malformed(name, e))?;
        let class_name = class.name().map_err(|e| CoverageError::malformed(name, e))?;
        if is_instrumented(&class) {
            return Err(CoverageError::AlreadyInstrumented { name: class_name });
        }

        let mut ids = ProbeIdGenerator::new();
        let plans = plan_methods(&class, &class_name, &mut ids)?;
        let probe_count = ids.count();
        let has_methods = plans.iter().any(|p| p.name != CLINIT);
        let kind = UnitKind::of(&class);
        let strategy = select(kind, class.major_version, probe_count, has_methods).ok_or_else(|| {
            CoverageError::unsupported(&class_name, format!("no probe strategy for {kind:?}"))
        })?;
        debug!(
            class = %class_name,
            id = format_args!("{id:016x}"),
            probe_count,
            %strategy,
            "instrumenting"
        );
        if strategy == Strategy::None {
            return Ok(InstrumentedUnit {
                bytes: bytes.to_vec(),
                class_id: id,
                probe_count,
                strategy,
                companion: None,
            });
        }

        let unit = UnitInfo {
            name: &class_name,
            id,
            probe_count,
            accessor: self.accessor.as_ref(),
        };
        let unsupported = |e: FormatError| CoverageError::unsupported(&class_name, e);
        let load = strategy.emit_load(&mut class, &unit).map_err(unsupported)?;
        let mode = self.accessor.mode();
        let emitter =
            ProbeEmitter::new(&mut class.pool, mode, 0..probe_count).map_err(unsupported)?;

        let mut bodies = Vec::with_capacity(plans.len());
        {
            let rewriter = MethodRewriter {
                pool: &class.pool,
                class_name: &class_name,
                emitter: &emitter,
                array_type: VType::Object(mode.class_name().to_string()),
            };
            for plan in &plans {
                let prologue = if plan.name == CLINIT {
                    &load.clinit
                } else {
                    &load.method
                };
                let with_frames =
                    class.major_version >= FRAMES_MAJOR_VERSION || plan.code.has_stack_map;
                let code = rewriter
                    .rewrite(&MethodInput {
                        code: &plan.code,
                        cfg: &plan.cfg,
                        initial: &plan.initial,
                        variable: plan.variable,
                        prologue,
                        prologue_stack: load.max_stack,
                        with_frames,
                    })
                    .map_err(|e| flow_error(&class_name, e))?;
                bodies.push((plan, code, with_frames));
            }
        }
        for (plan, code, with_frames) in bodies {
            let info = code
                .write(&mut class.pool, &plan.initial, with_frames)
                .map_err(unsupported)?;
            class.methods[plan.index].attributes[plan.attribute].info = info;
        }

        let companion = strategy
            .emit_members(&mut class, &unit)
            .map_err(unsupported)?
            .map(|companion| {
                Ok::<_, CoverageError>(CompanionUnit {
                    name: companion.name().map_err(unsupported)?,
                    bytes: companion.to_bytes().map_err(unsupported)?,
                })
            })
            .transpose()?;
        let bytes = class.to_bytes().map_err(unsupported)?;
        Ok(InstrumentedUnit {
            bytes,
            class_id: id,
            probe_count,
            strategy,
            companion,
        })
    }

    /// Instrument every class in a jar or zip archive
    ///
    /// Entries keep their order; companion classes follow the class they
    /// belong to. Nested archives are instrumented recursively, signature
    /// files are dropped and every other entry is copied as is.
    pub fn instrument_archive(
        &self,
        bytes: &[u8],
        location: &str,
    ) -> CoverageResult<InstrumentedArchive> {
        let mut out = Vec::new();
        let mut classes = 0;
        let mut probe_count = 0_u64;
        for entry in read_entries(bytes, location)? {
            if is_signature_entry(&entry.name) {
                debug!(archive = location, entry = %entry.name, "dropping signature entry");
                continue;
            }
            if entry.is_dir() {
                out.push(entry);
                continue;
            }
            let entry_location = entry.location(location);
            match ContentType::detect(&entry.bytes) {
                ContentType::ClassFile => {
                    let unit = self.instrument(&entry.bytes, &entry_location)?;
                    classes += 1;
                    probe_count += u64::from(unit.probe_count);
                    let companion = unit.companion.map(|companion| {
                        ArchiveEntry::new(
                            companion_entry(&entry.name, &companion.name),
                            companion.bytes,
                        )
                    });
                    out.push(ArchiveEntry::new(entry.name, unit.bytes));
                    out.extend(companion);
                }
                ContentType::Archive => {
                    let nested = self.instrument_archive(&entry.bytes, &entry_location)?;
                    classes += nested.classes;
                    probe_count += nested.probe_count;
                    out.push(ArchiveEntry::new(entry.name, nested.bytes));
                }
                ContentType::Other => out.push(entry),
            }
        }
        debug!(archive = location, classes, probe_count, "instrumented archive");
        Ok(InstrumentedArchive {
            bytes: write_entries(&out, location)?,
            classes,
            probe_count,
        })
    }
}

/// Entry name for a companion class, under the same root as its class entry
fn companion_entry(class_entry: &str, companion: &str) -> String {
    let root = companion
        .strip_suffix(COMPANION_SUFFIX)
        .and_then(|class| class_entry.strip_suffix(".class")?.strip_suffix(class))
        .unwrap_or("");
    format!("{root}{companion}.class")
}
