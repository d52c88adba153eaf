use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Weak;

use serde::{Deserialize, Serialize};

use crate::DepyoError;
use crate::analysis;
use crate::instr::{self, Instr, Op};

/// A constant-pool entry. Code constants nest the full code object of
/// the function, comprehension or class body they describe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Const {
    None,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Const>),
    Code(Box<CodeObject>),
}

impl Const {
    pub fn is_none(&self) -> bool {
        matches!(self, Const::None)
    }
}

/// Plain serialized form of a code unit, as produced by an external
/// container decoder. `bytecode` is raw wordcode and `lnotab` the
/// packed line-number table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub arg_count: u32,
    #[serde(default)]
    pub kwonly_arg_count: u32,
    #[serde(default)]
    pub first_line: u32,
    #[serde(default)]
    pub bytecode: Vec<u8>,
    #[serde(default)]
    pub consts: Vec<Const>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub varnames: Vec<String>,
    #[serde(default)]
    pub cellvars: Vec<String>,
    #[serde(default)]
    pub freevars: Vec<String>,
    #[serde(default)]
    pub lnotab: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeFlags(pub u32);

impl CodeFlags {
    pub fn optimized(self) -> bool {
        self.0 & 0x1 != 0
    }
    pub fn varargs(self) -> bool {
        self.0 & 0x4 != 0
    }
    pub fn varkwargs(self) -> bool {
        self.0 & 0x8 != 0
    }
    pub fn nested(self) -> bool {
        self.0 & 0x10 != 0
    }
    pub fn generator(self) -> bool {
        self.0 & 0x20 != 0
    }
    pub fn coroutine(self) -> bool {
        self.0 & 0x80 != 0
    }
    pub fn iterable_coroutine(self) -> bool {
        self.0 & 0x100 != 0
    }
    pub fn async_generator(self) -> bool {
        self.0 & 0x200 != 0
    }
    pub fn future_annotations(self) -> bool {
        self.0 & 0x10_0000 != 0
    }
}

/// Span of a `SETUP_LOOP` block, in instruction indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSpan {
    pub start: usize,
    pub end: usize,
    pub kind: LoopKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    For,
    WhileTrue,
    /// `end_cond` is the index of the last conditional jump that makes
    /// up the loop condition.
    While {
        end_cond: usize,
    },
}

/// Where a conditional branch sits inside a chained comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPos {
    Start,
    Inner,
    End,
}

/// Disposition of a conditional branch, computed once by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// Closes an `if`/`while` statement condition.
    Statement,
    /// Belongs to a conditional expression.
    Ternary,
    ChainStart,
    ChainInner,
    ChainEnd,
    /// Plain `and`/`or` operand jump.
    BoolOp,
}

/// Per-scope scratch state mutated while decompiling: declaration
/// sets and the branch annotations the executor is allowed to revise.
#[derive(Debug, Default)]
pub struct Scratch {
    pub globals: Vec<String>,
    pub nonlocals: Vec<String>,
    pub statement_jumps: Vec<usize>,
    pub qcjumps: Vec<usize>,
    pub annotated: bool,
    pub annotations: Option<Vec<String>>,
    pub comp_iterable: Option<String>,
}

/// A decoded code unit plus everything the analyzer knows about it.
pub struct Code {
    pub obj: CodeObject,
    pub instrs: Vec<Instr>,
    offsets: HashMap<u32, usize>,
    /// Byte offset of each source-line start, in offset order.
    pub linemap: BTreeMap<u32, u32>,
    pub flags: CodeFlags,
    pub parent: Option<Weak<Code>>,
    /// Cell names followed by free names, the `*_DEREF` name table.
    pub derefnames: Vec<String>,
    pub else_jumps: HashSet<usize>,
    pub loops: Vec<LoopSpan>,
    pub chain_jumps: HashMap<usize, ChainPos>,
    pub ternary_jumps: HashSet<usize>,
    /// Literal builds that spanned several source lines, with the line
    /// count, so the renderer can re-wrap them.
    pub implicit_continuation: HashMap<usize, u32>,
    pub scratch: RefCell<Scratch>,
}

impl Code {
    pub fn new(obj: CodeObject, parent: Option<Weak<Code>>) -> Result<Code, DepyoError> {
        let instrs = instr::decode(&obj.bytecode)?;
        let mut offsets = HashMap::with_capacity(instrs.len());
        for (i, ins) in instrs.iter().enumerate() {
            offsets.insert(ins.offset, i);
        }
        let derefnames: Vec<String> = obj
            .cellvars
            .iter()
            .chain(obj.freevars.iter())
            .cloned()
            .collect();
        validate_operands(&obj, &instrs, &offsets, &derefnames)?;
        let linemap = decode_linemap(&obj);
        let mut code = Code {
            flags: CodeFlags(obj.flags),
            obj,
            instrs,
            offsets,
            linemap,
            parent,
            derefnames,
            else_jumps: HashSet::new(),
            loops: Vec::new(),
            chain_jumps: HashMap::new(),
            ternary_jumps: HashSet::new(),
            implicit_continuation: HashMap::new(),
            scratch: RefCell::new(Scratch::default()),
        };
        analysis::annotate(&mut code);
        Ok(code)
    }

    pub fn name(&self) -> &str {
        &self.obj.name
    }

    /// Scopes compiled from synthetic code units; these never take part
    /// in implicit-global promotion.
    pub fn is_synthetic_scope(&self) -> bool {
        matches!(
            self.obj.name.as_str(),
            "<lambda>" | "<listcomp>" | "<setcomp>" | "<dictcomp>" | "<genexpr>"
        )
    }

    pub fn op(&self, index: usize) -> Op {
        self.instrs[index].op
    }

    pub fn arg(&self, index: usize) -> u32 {
        self.instrs[index].arg
    }

    pub fn index_of_offset(&self, offset: u32) -> Option<usize> {
        self.offsets.get(&offset).copied()
    }

    pub fn jump_index(&self, index: usize) -> Option<usize> {
        let target = self.instrs[index].jump_target()?;
        self.index_of_offset(target)
    }

    pub fn starts_line_at(&self, index: usize) -> bool {
        self.linemap.contains_key(&self.instrs[index].offset)
    }

    /// Whether the instruction opens or closes a statement at this
    /// address, counting line-start jumps and trailing pop-jumps.
    pub fn is_statement_at(&self, index: usize) -> bool {
        let op = self.op(index);
        if op.is_stmt()
            || (matches!(op, Op::JumpAbsolute | Op::JumpForward) && self.starts_line_at(index))
        {
            return true;
        }
        if op == Op::PopTop {
            if index > 0
                && matches!(
                    self.op(index - 1),
                    Op::JumpAbsolute | Op::JumpForward | Op::RotTwo
                )
            {
                return false;
            }
            return true;
        }
        if op.is_pop_jump() {
            return self.jump_index(index) == Some(index + 1);
        }
        false
    }

    /// A conditional or absolute jump straight back to the loop head.
    pub fn is_continue_jump_at(&self, index: usize) -> bool {
        if matches!(
            self.op(index),
            Op::PopJumpIfTrue | Op::PopJumpIfFalse | Op::JumpAbsolute
        ) {
            if let Some(j) = self.jump_index(index) {
                if self.op(j) == Op::ForIter {
                    return true;
                }
                if j > 0 && self.op(j - 1) == Op::SetupLoop {
                    return true;
                }
            }
        }
        false
    }

    pub fn is_statement_jump(&self, index: usize) -> bool {
        self.scratch.borrow().statement_jumps.contains(&index)
    }

    pub fn branch_kind(&self, index: usize) -> BranchKind {
        if let Some(pos) = self.chain_jumps.get(&index) {
            return match pos {
                ChainPos::Start => BranchKind::ChainStart,
                ChainPos::Inner => BranchKind::ChainInner,
                ChainPos::End => BranchKind::ChainEnd,
            };
        }
        if self.ternary_jumps.contains(&index) {
            return BranchKind::Ternary;
        }
        if self.is_statement_jump(index) {
            return BranchKind::Statement;
        }
        BranchKind::BoolOp
    }

    pub fn declare_global(&self, name: &str) {
        let mut scratch = self.scratch.borrow_mut();
        if !scratch.globals.iter().any(|g| g == name) {
            scratch.globals.push(name.to_owned());
        }
    }

    /// Promote `name` to an explicit global only when it shadows a
    /// local of an enclosing scope.
    pub fn ensure_global(&self, name: &str) {
        if self.is_synthetic_scope() {
            return;
        }
        let mut parent = self.parent.clone();
        while let Some(weak) = parent {
            let Some(up) = weak.upgrade() else {
                return;
            };
            if up.obj.varnames.iter().any(|v| v == name)
                || up.scratch.borrow().globals.iter().any(|g| g == name)
            {
                self.declare_global(name);
                return;
            }
            parent = up.parent.clone();
        }
    }

    pub fn declare_nonlocal(&self, name: &str) {
        let mut scratch = self.scratch.borrow_mut();
        if !scratch.nonlocals.iter().any(|n| n == name) {
            scratch.nonlocals.push(name.to_owned());
        }
    }

    pub fn is_cellvar(&self, index: usize) -> bool {
        index < self.obj.cellvars.len()
    }

    /// Renders the address / opcode / operand listing for this unit and
    /// every code constant nested below it.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        let mut pending: Vec<CodeObject> =
            nested_code(&self.obj).into_iter().cloned().collect();
        while let Some(obj) = pending.pop() {
            let _ = write!(out, "\nDisassembly of {}:\n", obj.name);
            pending.extend(nested_code(&obj).into_iter().cloned());
            match Code::new(obj, None) {
                Ok(code) => code.disassemble_into(&mut out),
                Err(e) => {
                    let _ = writeln!(out, "  <{e}>");
                }
            }
        }
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        for (i, ins) in self.instrs.iter().enumerate() {
            let mark = if self.else_jumps.contains(&i) { "* " } else { "  " };
            let _ = write!(out, "{}{:>6} {:<24}", mark, ins.offset, ins.op.name());
            if ins.op.has_arg() {
                let _ = write!(out, " {:>4}", ins.arg);
                if let Some(target) = ins.jump_target() {
                    if ins.op.has_rel_jump() {
                        let _ = write!(out, " (to {target})");
                    }
                }
                if let Some(value) = self.operand_text(ins) {
                    let _ = write!(out, " ({value})");
                }
            }
            out.push('\n');
        }
    }

    fn operand_text(&self, ins: &Instr) -> Option<String> {
        let i = ins.arg as usize;
        match ins.op {
            Op::LoadConst => self.obj.consts.get(i).map(crate::ast::const_repr),
            Op::LoadName
            | Op::StoreName
            | Op::DeleteName
            | Op::LoadGlobal
            | Op::StoreGlobal
            | Op::DeleteGlobal
            | Op::LoadAttr
            | Op::StoreAttr
            | Op::DeleteAttr
            | Op::ImportName
            | Op::ImportFrom
            | Op::LoadMethod => self.obj.names.get(i).cloned(),
            Op::LoadFast | Op::StoreFast | Op::DeleteFast => self.obj.varnames.get(i).cloned(),
            Op::LoadDeref
            | Op::StoreDeref
            | Op::DeleteDeref
            | Op::LoadClosure
            | Op::LoadClassderef => self.derefnames.get(i).cloned(),
            Op::CompareOp => crate::ast::CmpOp::from_arg(ins.arg).map(|c| c.text().to_owned()),
            _ => None,
        }
    }
}

fn nested_code(obj: &CodeObject) -> Vec<&CodeObject> {
    fn walk<'a>(consts: &'a [Const], out: &mut Vec<&'a CodeObject>) {
        for c in consts {
            match c {
                Const::Code(co) => out.push(co),
                Const::Tuple(inner) => walk(inner, out),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(&obj.consts, &mut out);
    out.reverse();
    out
}

/// Decodes the packed line table the way the interpreter's own line
/// walk does: address deltas of zero extend the current chunk, line
/// deltas are signed bytes, and an address becomes a line start only
/// when the running line actually changed.
fn decode_linemap(obj: &CodeObject) -> BTreeMap<u32, u32> {
    let mut map = BTreeMap::new();
    let mut last: Option<i64> = None;
    let mut line = i64::from(obj.first_line);
    let mut addr = 0u32;
    for pair in obj.lnotab.chunks_exact(2) {
        let (addr_incr, line_incr) = (pair[0], pair[1] as i8);
        if addr_incr != 0 {
            if last != Some(line) {
                map.insert(addr, line.max(0) as u32);
                last = Some(line);
            }
            addr += u32::from(addr_incr);
        }
        line += i64::from(line_incr);
    }
    if last != Some(line) {
        map.insert(addr, line.max(0) as u32);
    }
    map
}

fn validate_operands(
    obj: &CodeObject,
    instrs: &[Instr],
    offsets: &HashMap<u32, usize>,
    derefnames: &[String],
) -> Result<(), DepyoError> {
    for ins in instrs {
        let i = ins.arg as usize;
        let (len, table) = match ins.op {
            Op::LoadConst => (obj.consts.len(), "consts"),
            Op::LoadName
            | Op::StoreName
            | Op::DeleteName
            | Op::LoadGlobal
            | Op::StoreGlobal
            | Op::DeleteGlobal
            | Op::LoadAttr
            | Op::StoreAttr
            | Op::DeleteAttr
            | Op::ImportName
            | Op::ImportFrom
            | Op::LoadMethod => (obj.names.len(), "names"),
            Op::LoadFast | Op::StoreFast | Op::DeleteFast => (obj.varnames.len(), "varnames"),
            Op::LoadDeref
            | Op::StoreDeref
            | Op::DeleteDeref
            | Op::LoadClosure
            | Op::LoadClassderef => (derefnames.len(), "derefnames"),
            _ => {
                if let Some(target) = ins.jump_target() {
                    if !offsets.contains_key(&target) {
                        return Err(DepyoError::BadJumpTarget {
                            offset: ins.offset,
                            target,
                        });
                    }
                }
                continue;
            }
        };
        if i >= len {
            return Err(DepyoError::BadOperandIndex {
                offset: ins.offset,
                table,
                index: i,
                len,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::instr::Op;

    fn words(pairs: &[(Op, u8)]) -> Vec<u8> {
        pairs.iter().flat_map(|&(op, arg)| [op as u8, arg]).collect()
    }

    fn simple_obj(pairs: &[(Op, u8)]) -> CodeObject {
        CodeObject {
            name: "<module>".into(),
            bytecode: words(pairs),
            consts: vec![Const::None],
            first_line: 1,
            ..Default::default()
        }
    }

    #[test]
    fn linemap_decodes_packed_deltas() {
        let mut obj = simple_obj(&[(Op::LoadConst, 0), (Op::ReturnValue, 0)]);
        obj.first_line = 3;
        obj.lnotab = vec![2, 1];
        let code = Code::new(obj, None).unwrap();
        assert_eq!(code.linemap.get(&0), Some(&3));
        assert_eq!(code.linemap.get(&2), Some(&4));
    }

    #[test]
    fn linemap_applies_signed_line_decrements() {
        let mut obj = simple_obj(&[(Op::LoadConst, 0), (Op::ReturnValue, 0)]);
        obj.first_line = 5;
        obj.lnotab = vec![2, 0xFF];
        let code = Code::new(obj, None).unwrap();
        assert_eq!(code.linemap.get(&0), Some(&5));
        assert_eq!(code.linemap.get(&2), Some(&4));
    }

    #[test]
    fn linemap_spans_split_address_chunks() {
        let mut obj = simple_obj(&[(Op::LoadConst, 0), (Op::ReturnValue, 0)]);
        obj.first_line = 1;
        obj.lnotab = vec![255, 0, 5, 1];
        let code = Code::new(obj, None).unwrap();
        assert_eq!(code.linemap.get(&0), Some(&1));
        assert_eq!(code.linemap.get(&255), None);
        assert_eq!(code.linemap.get(&260), Some(&2));
    }

    #[test]
    fn rejects_out_of_range_const_index() {
        let mut obj = simple_obj(&[(Op::LoadConst, 7), (Op::ReturnValue, 0)]);
        obj.consts = vec![Const::None];
        assert!(matches!(
            Code::new(obj, None),
            Err(DepyoError::BadOperandIndex { index: 7, .. })
        ));
    }

    #[test]
    fn rejects_jump_between_instruction_boundaries() {
        let mut obj = simple_obj(&[
            (Op::JumpAbsolute, 3),
            (Op::LoadConst, 0),
            (Op::ReturnValue, 0),
        ]);
        obj.consts = vec![Const::None];
        assert!(matches!(
            Code::new(obj, None),
            Err(DepyoError::BadJumpTarget { target: 3, .. })
        ));
    }

    #[test]
    fn disassembly_includes_nested_code_units() {
        let inner = CodeObject {
            name: "f".into(),
            bytecode: words(&[(Op::LoadConst, 0), (Op::ReturnValue, 0)]),
            consts: vec![Const::None],
            first_line: 1,
            ..Default::default()
        };
        let mut obj = simple_obj(&[(Op::LoadConst, 0), (Op::ReturnValue, 0)]);
        obj.consts = vec![Const::Code(Box::new(inner))];
        let code = Code::new(obj, None).unwrap();
        let listing = code.disassemble();
        assert!(listing.contains("Disassembly of f:"), "{listing}");
    }
}
