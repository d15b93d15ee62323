use std::io::{self, Write};

use crate::error::{SemaError, SemaResult};
use crate::sema::constant_pool::ConstantPool;
use crate::sema::flattener::{flatten_instruction, InstSemantics};
use crate::sema::opcode::{validate_stream, DcOp, OpSig};
use crate::sema::pattern::{InstFlags, InstPattern, SdNodeEquivMap};

/// The three parallel tables in their owned, build-time form.
#[derive(Debug, Clone)]
pub struct SemaTableSet {
    /// Concatenated semantic streams. Cell 0 is a bare `END_OF_INSTRUCTION`.
    pub semantics: Vec<u32>,
    /// Per-instruction offsets into `semantics`; 0 means "no semantics".
    pub opcode_to_sema_idx: Vec<u32>,
    /// Deduplicated constants; index 0 reserved.
    pub constants: Vec<u64>,
}

impl SemaTableSet {
    pub fn tables(&self) -> SemaTables<'_> {
        SemaTables {
            semantics: &self.semantics,
            opcode_to_sema_idx: &self.opcode_to_sema_idx,
            constants: &self.constants,
        }
    }
}

/// Borrowed view of the tables — what the interpreter reads. Freely
/// shareable; immutable after build.
#[derive(Debug, Clone, Copy)]
pub struct SemaTables<'a> {
    pub semantics: &'a [u32],
    pub opcode_to_sema_idx: &'a [u32],
    pub constants: &'a [u64],
}

impl<'a> SemaTables<'a> {
    /// Stream offset for a target instruction opcode. 0 means the
    /// instruction has no semantics (out-of-range opcodes included).
    pub fn sema_offset(&self, opcode: u32) -> u32 {
        self.opcode_to_sema_idx
            .get(opcode as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn constant(&self, idx: u32) -> Option<u64> {
        if idx == 0 {
            return None;
        }
        self.constants.get(idx as usize).copied()
    }

    /// Validate every defined stream against the opcode arity metadata.
    pub fn validate(&self, target_sig: &dyn Fn(u32) -> Option<OpSig>) -> SemaResult<()> {
        if self.semantics.first() != Some(&DcOp::EndOfInstruction.encode()) {
            return Err(SemaError::MalformedStream {
                offset: 0,
                reason: "table does not start with the dummy END_OF_INSTRUCTION".to_string(),
            });
        }
        for &off in self.opcode_to_sema_idx {
            if off != 0 {
                validate_stream(self.semantics, off as usize, target_sig)?;
            }
        }
        Ok(())
    }
}

/// Consolidates flattened per-instruction semantics into the three tables.
///
/// Explicit semantic definitions are registered with `add_explicit` and
/// always win; `add_instruction` derives semantics from an instruction's
/// own pattern only when no explicit definition exists and the instruction
/// is not codegen-only.
pub struct SemanticsBuilder {
    equiv: SdNodeEquivMap,
    pool: ConstantPool,
    defined: Vec<Option<(String, InstSemantics)>>,
}

impl SemanticsBuilder {
    pub fn new(num_instructions: usize, equiv: SdNodeEquivMap) -> Self {
        Self {
            equiv,
            pool: ConstantPool::new(),
            defined: vec![None; num_instructions],
        }
    }

    fn check_range(&self, inst: u32) -> SemaResult<usize> {
        let idx = inst as usize;
        if idx >= self.defined.len() {
            return Err(SemaError::InstOutOfRange {
                inst: idx,
                size: self.defined.len(),
            });
        }
        Ok(idx)
    }

    /// Register an explicit semantic definition. A later explicit
    /// definition for the same instruction replaces an earlier one.
    pub fn add_explicit(&mut self, pattern: &InstPattern) -> SemaResult<()> {
        let idx = self.check_range(pattern.inst)?;
        if let Some(sema) = flatten_instruction(pattern, &self.equiv, &mut self.pool)? {
            self.defined[idx] = Some((pattern.name.clone(), sema));
        }
        Ok(())
    }

    /// Derive semantics from an instruction's pattern. Skipped silently
    /// when an explicit definition already exists, the instruction is
    /// codegen-only, or the pattern list is empty.
    pub fn add_instruction(&mut self, pattern: &InstPattern) -> SemaResult<()> {
        let idx = self.check_range(pattern.inst)?;
        if self.defined[idx].is_some()
            || pattern.flags.contains(InstFlags::CODEGEN_ONLY)
            || pattern.trees.is_empty()
        {
            return Ok(());
        }
        if let Some(sema) = flatten_instruction(pattern, &self.equiv, &mut self.pool)? {
            self.defined[idx] = Some((pattern.name.clone(), sema));
        }
        Ok(())
    }

    pub fn has_semantics(&self, inst: u32) -> bool {
        self.defined
            .get(inst as usize)
            .map(|d| d.is_some())
            .unwrap_or(false)
    }

    /// Pack everything into the three parallel tables.
    pub fn build(self) -> SemaTableSet {
        let mut semantics = vec![DcOp::EndOfInstruction.encode()];
        let mut opcode_to_sema_idx = vec![0u32; self.defined.len()];

        for (inst, entry) in self.defined.iter().enumerate() {
            let Some((_, sema)) = entry else { continue };
            opcode_to_sema_idx[inst] = semantics.len() as u32;
            for node in &sema.nodes {
                semantics.push(node.opcode.encode());
                for ty in &node.types {
                    semantics.push(ty.encode());
                }
                semantics.extend_from_slice(&node.operands);
            }
            semantics.push(DcOp::EndOfInstruction.encode());
        }

        SemaTableSet {
            semantics,
            opcode_to_sema_idx,
            constants: self.pool.into_table(),
        }
    }

    /// Write the tables as an embeddable Rust translation unit: the stable
    /// build-to-runtime artifact. Layout matches `build()` exactly.
    pub fn write_source(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "// Target instruction semantics tables.")?;
        writeln!(out, "// Generated by the semantics emitter; do not edit.")?;
        writeln!(out)?;

        // INST_SEMANTICS
        let mut len = 1usize;
        for entry in self.defined.iter().flatten() {
            let (_, sema) = entry;
            for node in &sema.nodes {
                len += 1 + node.types.len() + node.operands.len();
            }
            len += 1;
        }
        writeln!(out, "pub static INST_SEMANTICS: [u32; {}] = [", len)?;
        writeln!(
            out,
            "    {:#010x}, // END_OF_INSTRUCTION",
            DcOp::EndOfInstruction.encode()
        )?;
        let mut offset = 1usize;
        let mut offsets = vec![0u32; self.defined.len()];
        for (inst, entry) in self.defined.iter().enumerate() {
            let Some((name, sema)) = entry else { continue };
            offsets[inst] = offset as u32;
            writeln!(out, "    // {}", name)?;
            for node in &sema.nodes {
                write!(out, "    {:#010x},", node.opcode.encode())?;
                for ty in &node.types {
                    write!(out, " {},", ty.encode())?;
                }
                for op in &node.operands {
                    write!(out, " {},", op)?;
                }
                writeln!(out, " // {}", node)?;
                offset += 1 + node.types.len() + node.operands.len();
            }
            writeln!(
                out,
                "    {:#010x}, // END_OF_INSTRUCTION",
                DcOp::EndOfInstruction.encode()
            )?;
            offset += 1;
        }
        writeln!(out, "];")?;
        writeln!(out)?;

        // OPCODE_TO_SEMA_IDX
        writeln!(
            out,
            "pub static OPCODE_TO_SEMA_IDX: [u32; {}] = [",
            self.defined.len()
        )?;
        for (inst, entry) in self.defined.iter().enumerate() {
            match entry {
                Some((name, _)) => writeln!(out, "    {}, // {}", offsets[inst], name)?,
                None => writeln!(out, "    0,")?,
            }
        }
        writeln!(out, "];")?;
        writeln!(out)?;

        // CONSTANT_ARRAY
        writeln!(
            out,
            "pub static CONSTANT_ARRAY: [u64; {}] = [",
            self.pool.len() + 1
        )?;
        writeln!(out, "    0, // reserved")?;
        for idx in 1..=self.pool.len() as u32 {
            let value = self.pool.get(idx).expect("dense pool index");
            writeln!(out, "    {},", value)?;
        }
        writeln!(out, "];")?;
        Ok(())
    }
}
