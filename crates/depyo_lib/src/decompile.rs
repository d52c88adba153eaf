//! Symbolic executor that turns decoded wordcode back into statements.
//!
//! A [`Decompiler`] walks one instruction range of a [`Code`] unit with a
//! value stack of [`Val`] entries. Expression opcodes combine stack values
//! into [`Expr`] trees; statement opcodes flush them into the suite.
//! Control-flow opcodes recurse with child decompilers over sub-ranges and
//! stitch the resulting suites into `if`/`while`/`for`/`try` statements.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use crate::ast::{
    BinOp, CallArg, ClassStmt, CmpOp, CompKind, DefStmt, DictItem, Expr, ForStmt, FromList,
    IfStmt, ImportStmt, Stmt, Suite, TryStmt, UnOp, WhileStmt, WithStmt, const_repr,
};
use crate::code::{ChainPos, Code, Const, LoopKind, LoopSpan};
use crate::instr::Op;
use crate::{NullObserver, Observer};

/// Stand-in name pushed when the stack does not hold what an opcode
/// shape promised. It renders as-is so broken spots stay visible.
const PLACEHOLDER: &str = "<unrecognised>";

const DIAG_EMPTY_POP: &str = "\"\"\"decompilation error: POP_TOP on an empty stack\"\"\"";
const DIAG_WHILE_COND: &str =
    "\"\"\"decompilation error: while condition is not an if statement\"\"\"";

/// What the executor does after one instruction.
enum Flow {
    /// Fall through to the next instruction.
    Next,
    /// Continue at the given instruction index.
    Jump(usize),
    /// The current range is fully consumed.
    End,
}

/// One value-stack slot. Most entries are plain expressions; the rest
/// are statements under construction that later stores and pops fill in.
#[derive(Clone)]
enum Val {
    Expr(Expr),
    BuildClass,
    Import(Rc<RefCell<ImportStmt>>),
    ImportFrom(Rc<RefCell<ImportStmt>>),
    Unpack(Rc<RefCell<UnpackState>>),
    For(Rc<RefCell<ForStmt>>),
    With(Rc<RefCell<WithStmt>>),
    Try(Rc<RefCell<TryStmt>>),
    Def {
        def: Rc<RefCell<DefStmt>>,
        code: Rc<Code>,
    },
    Class(Rc<RefCell<ClassStmt>>),
    Comp {
        kind: CompKind,
        code: Rc<Code>,
    },
    InPlace {
        op: BinOp,
        left: Expr,
        right: Expr,
    },
    /// Argument pack built by `BUILD_*_UNPACK_WITH_CALL`.
    Args(Vec<Expr>),
}

/// Collects the targets of a sequence/extended unpack. The same state is
/// pushed once per target; each store fills one slot and the last store
/// replays the unpacked value as a tuple assignment.
struct UnpackState {
    val: Entry,
    count: usize,
    star_index: Option<usize>,
    dests: Vec<Expr>,
}

/// A stack slot with an identity tag. Tags survive `DUP_TOP` so chained
/// assignments can tell whether the assigned value is still on the stack.
#[derive(Clone)]
struct Entry {
    val: Val,
    tag: u64,
}

#[derive(Default)]
struct Stack {
    entries: Vec<Entry>,
    next_tag: u64,
}

impl Stack {
    fn push(&mut self, val: Val) {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.entries.push(Entry { val, tag });
    }

    fn push_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    fn pop(&mut self) -> Option<Entry> {
        self.entries.pop()
    }

    /// Pops `n` entries, returned bottom first.
    fn pop_n(&mut self, n: usize) -> Vec<Entry> {
        let at = self.entries.len().saturating_sub(n);
        self.entries.split_off(at)
    }

    fn peek(&self) -> Option<Entry> {
        self.entries.last().cloned()
    }

    fn peek_n(&self, n: usize) -> Vec<Entry> {
        let at = self.entries.len().saturating_sub(n);
        self.entries[at..].to_vec()
    }

    fn contains_tag(&self, tag: u64) -> bool {
        self.entries.iter().any(|e| e.tag == tag)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A pending conditional jump waiting to be folded into an `and`/`or`
/// chain once a later jump with a matching target shows up.
struct PopJump {
    truth: bool,
    target: usize,
    cond: Expr,
    origin: usize,
}

fn entry_expr(entry: Entry) -> Expr {
    match entry.val {
        Val::Expr(e) => e,
        _ => Expr::name(PLACEHOLDER),
    }
}

pub(crate) struct Decompiler {
    code: Rc<Code>,
    start: usize,
    /// Exclusive end of the range; equals `len` when unbounded.
    end: usize,
    bounded: bool,
    /// Last instruction index of the range.
    end_block: usize,
    stack: Rc<RefCell<Stack>>,
    suite: Suite,
    /// Assignment targets accumulated across `DUP_TOP`-duplicated stores.
    chain: Vec<Expr>,
    popjumps: Vec<PopJump>,
    /// Stop in front of an unconditional jump so the caller can carve
    /// out a loop `else` suite.
    scan_for_else: bool,
    /// Stop at `END_FINALLY` instead of treating it as a block end.
    find_end_finally: bool,
    /// Stop in front of `RETURN_VALUE` and leave its operand stacked.
    expression_in_result: bool,
    observer: Rc<dyn Observer>,
}

impl Decompiler {
    fn new_range(
        code: &Rc<Code>,
        start: usize,
        end: Option<usize>,
        stack: Option<Rc<RefCell<Stack>>>,
        observer: &Rc<dyn Observer>,
    ) -> Decompiler {
        let len = code.instrs.len();
        let (end, bounded) = match end {
            Some(e) => (e.min(len), true),
            None => (len, false),
        };
        let end_block = if bounded {
            end.saturating_sub(1)
        } else {
            len.saturating_sub(1)
        };
        Decompiler {
            code: Rc::clone(code),
            start,
            end,
            bounded,
            end_block,
            stack: stack.unwrap_or_default(),
            suite: Suite::default(),
            chain: Vec::new(),
            popjumps: Vec::new(),
            scan_for_else: false,
            find_end_finally: false,
            expression_in_result: false,
            observer: Rc::clone(observer),
        }
    }

    fn sub(&self, start: usize, end: usize) -> Decompiler {
        Decompiler::new_range(&self.code, start, Some(end), None, &self.observer)
    }

    fn sub_opt(&self, start: usize, end: Option<usize>) -> Decompiler {
        Decompiler::new_range(&self.code, start, end, None, &self.observer)
    }

    fn sub_unbounded(&self, start: usize) -> Decompiler {
        Decompiler::new_range(&self.code, start, None, None, &self.observer)
    }

    /// Child range sharing this decompiler's value stack.
    fn sub_shared(&self, start: usize, end: usize) -> Decompiler {
        Decompiler::new_range(
            &self.code,
            start,
            Some(end),
            Some(Rc::clone(&self.stack)),
            &self.observer,
        )
    }

    /// Child range that inherits this decompiler's end bound.
    fn sub_to_end(&self, start: usize) -> Decompiler {
        Decompiler::new_range(&self.code, start, self.bound_end(), None, &self.observer)
    }

    fn bound_end(&self) -> Option<usize> {
        self.bounded.then_some(self.end)
    }

    // instruction accessors

    fn len(&self) -> usize {
        self.code.instrs.len()
    }

    fn op(&self, index: usize) -> Op {
        self.code.op(index)
    }

    fn op_at(&self, index: usize) -> Option<Op> {
        self.code.instrs.get(index).map(|i| i.op)
    }

    fn op_is(&self, index: usize, op: Op) -> bool {
        self.op_at(index) == Some(op)
    }

    fn arg(&self, index: usize) -> u32 {
        self.code.arg(index)
    }

    fn jump(&self, index: usize) -> Option<usize> {
        self.code.jump_index(index)
    }

    fn starts_line(&self, index: usize) -> bool {
        self.code.starts_line_at(index)
    }

    fn is_continue(&self, index: usize) -> bool {
        index < self.len() && self.code.is_continue_jump_at(index)
    }

    fn is_else_jump(&self, index: usize) -> bool {
        self.code.else_jumps.contains(&index)
    }

    fn names(&self, arg: u32) -> String {
        self.code.obj.names.get(arg as usize).cloned().unwrap_or_default()
    }

    fn varname(&self, arg: u32) -> String {
        self.code
            .obj
            .varnames
            .get(arg as usize)
            .cloned()
            .unwrap_or_default()
    }

    fn derefname(&self, arg: u32) -> String {
        self.code
            .derefnames
            .get(arg as usize)
            .cloned()
            .unwrap_or_default()
    }

    fn const_at(&self, arg: u32) -> Const {
        self.code
            .obj
            .consts
            .get(arg as usize)
            .cloned()
            .unwrap_or(Const::None)
    }

    /// First index after `from` whose opcode satisfies `pred`, scanning
    /// up to `end` (exclusive) or the end of the code.
    fn seek_fwd(&self, from: usize, pred: impl Fn(Op) -> bool, end: Option<usize>) -> Option<usize> {
        let stop = end.unwrap_or(self.len()).min(self.len());
        ((from + 1)..stop).find(|&i| pred(self.op(i)))
    }

    /// First index before `from` whose opcode satisfies `pred`, scanning
    /// down to `end` (exclusive) or the start of the code.
    fn seek_back(&self, from: usize, pred: impl Fn(Op) -> bool, end: Option<usize>) -> Option<usize> {
        let lo = end.map_or(0, |e| e + 1);
        (lo..from.min(self.len())).rev().find(|&i| pred(self.op(i)))
    }

    /// First statement boundary at or after `from`, before `end`.
    fn seek_stmt(&self, from: usize, end: Option<usize>) -> Option<usize> {
        let stop = end.unwrap_or(self.len()).min(self.len());
        (from..stop).find(|&i| self.code.is_statement_at(i))
    }

    /// Innermost loop whose block spans `index`.
    fn last_loop(&self, index: usize) -> Option<LoopSpan> {
        self.code
            .loops
            .iter()
            .copied()
            .filter(|s| s.start <= index && index <= s.end)
            .max_by_key(|s| s.start)
    }

    /// Executes the range. Returns the index the walk stopped at, which
    /// is past the range unless a scan flag cut it short.
    fn run(&mut self) -> usize {
        let stop = if self.bounded {
            self.end.min(self.len())
        } else {
            self.len()
        };
        let mut addr = self.start;
        while addr < stop {
            if self.scan_for_else
                && ((self.op(addr) == Op::JumpAbsolute && !self.starts_line(addr))
                    || self.op(addr) == Op::JumpForward)
            {
                break;
            }
            if self.find_end_finally && self.op(addr) == Op::EndFinally {
                break;
            }
            let next = match self.exec(addr) {
                Flow::End => {
                    addr = stop;
                    break;
                }
                Flow::Next => addr + 1,
                // an opcode may only send the walk forwards
                Flow::Jump(j) => j.max(addr + 1),
            };
            if (self.scan_for_else || self.find_end_finally)
                && next < self.len()
                && self.op(next) == Op::ReturnValue
            {
                addr = next;
                break;
            }
            addr = next;
            if self.expression_in_result && addr < self.len() && self.op(addr) == Op::ReturnValue {
                break;
            }
        }
        addr
    }

    // value stack helpers

    fn fresh_entry(&self, val: Val) -> Entry {
        let mut stack = self.stack.borrow_mut();
        let tag = stack.next_tag;
        stack.next_tag += 1;
        Entry { val, tag }
    }

    fn push_val(&mut self, val: Val) {
        self.stack.borrow_mut().push(val);
    }

    fn push_expr(&mut self, e: Expr) {
        self.push_val(Val::Expr(e));
    }

    fn pop_entry(&mut self) -> Option<Entry> {
        self.stack.borrow_mut().pop()
    }

    fn pop_expr(&mut self) -> Expr {
        match self.pop_entry() {
            Some(e) => entry_expr(e),
            None => Expr::name(PLACEHOLDER),
        }
    }

    /// Pops `n` expressions, returned bottom first.
    fn pop_exprs(&mut self, n: usize) -> Vec<Expr> {
        self.stack
            .borrow_mut()
            .pop_n(n)
            .into_iter()
            .map(entry_expr)
            .collect()
    }

    fn pop2(&mut self) -> (Expr, Expr) {
        let mut it = self.stack.borrow_mut().pop_n(2).into_iter().map(entry_expr);
        let a = it.next().unwrap_or_else(|| Expr::name(PLACEHOLDER));
        let b = it.next().unwrap_or_else(|| Expr::name(PLACEHOLDER));
        (a, b)
    }

    // boolean-jump folding

    fn mk_bool(is_and: bool, left: Expr, right: Expr, fold: Option<bool>) -> Expr {
        let fold = fold.unwrap_or_else(|| Self::default_fold(&left, &right));
        if is_and {
            Expr::BoolAnd {
                left: Box::new(left),
                right: Box::new(right),
                fold,
            }
        } else {
            Expr::BoolOr {
                left: Box::new(left),
                right: Box::new(right),
                fold,
            }
        }
    }

    fn default_fold(left: &Expr, right: &Expr) -> bool {
        match (left, right) {
            (Expr::Unary { op: UnOp::Not, .. }, r) => !r.starts_with_identity_cmp(),
            (l, Expr::Unary { op: UnOp::Not, .. }) => !l.starts_with_identity_cmp(),
            _ => false,
        }
    }

    /// Connects `cond` onto `jcond`, left-associating same-connective
    /// chains so the rendering needs no parentheses.
    fn combine(is_and: bool, cond: Expr, jcond: Expr, fold: bool) -> Expr {
        match (is_and, jcond) {
            (true, Expr::BoolAnd { left, right, .. }) => Self::mk_bool(
                true,
                Self::mk_bool(true, cond, *left, Some(fold)),
                *right,
                Some(fold),
            ),
            (false, Expr::BoolOr { left, right, .. }) => Self::mk_bool(
                false,
                Self::mk_bool(false, cond, *left, Some(fold)),
                *right,
                Some(fold),
            ),
            (_, jcond) => Self::mk_bool(is_and, cond, jcond, Some(fold)),
        }
    }

    /// Registers a conditional jump and merges it with pending jumps
    /// that share a target, turning branch pairs into `and`/`or` nodes.
    ///
    /// A pending jump merges when the new jump lands on the same target
    /// (both branches bail the same way) or on the instruction right
    /// after the new jump (the earlier branch short-circuits past it).
    /// The truthiness pair decides the connective and which side gets
    /// negated.
    fn push_popjump(&mut self, mut jtruth: bool, jaddr: usize, mut jcond: Expr, origin: usize) {
        let next_addr = if matches!(self.code.chain_jumps.get(&origin), Some(ChainPos::End)) {
            if self.op(origin) == Op::PopJumpIfTrue {
                origin + 3
            } else {
                origin + 4
            }
        } else {
            origin + 1
        };
        loop {
            let Some(top) = self.popjumps.last() else { break };
            let (truth, target) = (top.truth, top.target);
            let on_target = jaddr == target;
            if !on_target && target != next_addr {
                break;
            }
            let mut cond = self.popjumps.pop().map(|p| p.cond).unwrap_or_else(|| Expr::name(PLACEHOLDER));
            let mut fold = false;
            let is_and;
            if on_target {
                match (truth, jtruth) {
                    (true, true) => is_and = false,
                    (true, false) => {
                        if cond.starts_with_identity_cmp() {
                            is_and = false;
                            jcond = jcond.negated();
                            jtruth = true;
                        } else {
                            is_and = true;
                            cond = cond.negated();
                            fold = true;
                        }
                    }
                    (false, true) => {
                        if jcond.starts_with_identity_cmp() {
                            is_and = false;
                            cond = cond.negated();
                        } else {
                            is_and = true;
                            jcond = jcond.negated();
                            jtruth = false;
                            fold = true;
                        }
                    }
                    (false, false) => is_and = true,
                }
            } else {
                match (truth, jtruth) {
                    (true, true) => {
                        if jcond.starts_with_identity_cmp()
                            || self.op(origin) == Op::JumpIfTrueOrPop
                        {
                            is_and = true;
                            cond = cond.negated();
                        } else {
                            is_and = false;
                            jcond = jcond.negated();
                            jtruth = false;
                            fold = true;
                        }
                    }
                    (true, false) => is_and = false,
                    (false, true) => is_and = true,
                    (false, false) => {
                        if cond.starts_with_identity_cmp() {
                            is_and = true;
                            jcond = jcond.negated();
                            jtruth = true;
                        } else {
                            is_and = false;
                            cond = cond.negated();
                            fold = true;
                        }
                    }
                }
            }
            jcond = Self::combine(is_and, cond, jcond, fold);
        }
        if self.op(origin) == Op::JumpIfTrueOrPop {
            jtruth = !jtruth;
        }
        self.popjumps.push(PopJump {
            truth: jtruth,
            target: jaddr,
            cond: jcond,
            origin,
        });
    }

    fn pop_popjump(&mut self) -> Expr {
        match self.popjumps.pop() {
            Some(pj) if pj.truth => pj.cond.negated(),
            Some(pj) => pj.cond,
            None => Expr::name(PLACEHOLDER),
        }
    }

    /// Farthest pending jump target, if it stays inside this range.
    fn farthest_popjump_target(&self) -> Option<usize> {
        let far = self.popjumps.iter().map(|p| p.target).max()?;
        (far <= self.end_block).then_some(far)
    }

    /// Folds the pending jumps for an `if cond: pass else:` shape, first
    /// retargeting the ones that aim at the far else-end back to the
    /// body so they merge as part of the condition.
    fn if_pass_cond(
        &mut self,
        truth: bool,
        jump_addr: usize,
        cond: Expr,
        origin: usize,
        next_addr: usize,
        far: usize,
    ) -> Expr {
        for pj in &mut self.popjumps {
            if pj.target == far {
                pj.target = next_addr;
            }
        }
        self.push_popjump(truth, jump_addr, cond, origin);
        self.pop_popjump()
    }

    // statement emission

    fn write(&mut self, text: impl Into<String>) {
        self.suite.add(Stmt::Simple(text.into()));
    }

    fn flush_assign(&mut self, value: Option<Expr>) {
        if let Some(value) = value {
            self.chain.push(value);
        }
        let chain = mem::take(&mut self.chain);
        self.suite.add(Stmt::Assign(chain));
    }

    /// Routes a store target to whatever the stack top is building: a
    /// plain assignment, an unpack slot, a loop/with/except binding, an
    /// import alias, or a `def`/`class` name.
    fn store(&mut self, dest: Expr) {
        let Some(entry) = self.pop_entry() else {
            self.chain.push(dest);
            self.flush_assign(None);
            return;
        };
        match entry.val {
            Val::Expr(e) => {
                self.chain.push(dest);
                let still_stacked = self.stack.borrow().contains_tag(entry.tag);
                if !still_stacked {
                    self.flush_assign(Some(e));
                }
            }
            Val::InPlace { op, left, right } => {
                self.suite.add(Stmt::InPlace { op, left, right });
            }
            Val::Unpack(state) => {
                let complete = {
                    let mut st = state.borrow_mut();
                    let dest = if Some(st.dests.len()) == st.star_index {
                        Expr::Starred(Box::new(dest))
                    } else {
                        dest
                    };
                    st.dests.push(dest);
                    st.dests.len() == st.count
                };
                if complete {
                    let (val, dests) = {
                        let mut st = state.borrow_mut();
                        (st.val.clone(), mem::take(&mut st.dests))
                    };
                    self.stack.borrow_mut().push_entry(val);
                    self.store(Expr::tuple(dests));
                }
            }
            Val::For(f) => f.borrow_mut().dest = Some(dest),
            Val::With(w) => w.borrow_mut().name = Some(dest),
            Val::Try(t) => {
                if let Some(clause) = t.borrow_mut().clauses.last_mut() {
                    clause.name = Some(dest);
                }
            }
            Val::Import(imp) => {
                let plain = matches!(imp.borrow().fromlist, FromList::Plain);
                if plain {
                    imp.borrow_mut().alias = Some(dest);
                    self.suite.add(Stmt::Import(imp));
                } else {
                    imp.borrow_mut().aslist.push(dest.to_string());
                }
            }
            Val::ImportFrom(imp) => imp.borrow_mut().aslist.push(dest.to_string()),
            Val::Def { def, .. } => {
                def.borrow_mut().name = Some(dest);
                self.suite.add(Stmt::Def(def));
            }
            Val::Class(class) => {
                class.borrow_mut().name = Some(dest);
                self.suite.add(Stmt::Class(class));
            }
            Val::BuildClass | Val::Comp { .. } | Val::Args(_) => {
                self.chain.push(dest);
                self.flush_assign(Some(Expr::name(PLACEHOLDER)));
            }
        }
    }

    fn pop_top(&mut self) {
        match self.pop_entry() {
            None => {
                self.observer.diagnostic("POP_TOP on an empty stack");
                self.write(DIAG_EMPTY_POP);
            }
            Some(Entry {
                val: Val::Expr(e), ..
            }) => {
                let text = e.to_string();
                self.write(text);
            }
            Some(Entry {
                val: Val::Import(imp),
                ..
            }) => self.suite.add(Stmt::Import(imp)),
            Some(_) => {}
        }
    }

    /// Patches up the last statement of a loop body. A trailing explicit
    /// `continue` on the loop's closing jump line becomes `pass`; a
    /// trailing `return` merged across the loop edge means the branch
    /// layout was misread, so one quasi-continue jump is promoted to a
    /// statement boundary and the caller retries.
    fn verify_loop_tail(
        code: &Rc<Code>,
        end_block: usize,
        suite: &mut Suite,
        start: usize,
        end: usize,
    ) -> bool {
        if end_block >= code.instrs.len() || !code.is_continue_jump_at(end_block) {
            return true;
        }
        let Some(stmt) = suite.statements.last_mut() else {
            return true;
        };
        if let Stmt::Simple(text) = stmt {
            if text == "continue" && code.starts_line_at(end_block) {
                *text = "pass".to_owned();
            } else if text.starts_with("return") && !code.starts_line_at(end_block) {
                let mut scratch = code.scratch.borrow_mut();
                if let Some(pos) = scratch.qcjumps.iter().position(|&a| start <= a && a < end) {
                    let moved = scratch.qcjumps.remove(pos);
                    scratch.statement_jumps.push(moved);
                    return false;
                }
            }
        }
        true
    }

    // expression opcode helpers

    fn binary(&mut self, op: BinOp) {
        let (left, right) = self.pop2();
        self.push_expr(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        });
    }

    fn inplace(&mut self, op: BinOp) {
        let (left, right) = self.pop2();
        self.push_val(Val::InPlace { op, left, right });
    }

    fn unary(&mut self, op: UnOp) {
        let operand = self.pop_expr();
        self.push_expr(Expr::Unary {
            op,
            operand: Box::new(operand),
        });
    }
}

// Opcode dispatch and the data-flow handlers.
impl Decompiler {
    fn exec(&mut self, addr: usize) -> Flow {
        let op = self.op(addr);
        let arg = self.arg(addr);
        match op {
            Op::Nop
            | Op::PopBlock
            | Op::GetIter
            | Op::GetYieldFromIter
            | Op::ExtendedArg
            | Op::SetupAsyncWith
            | Op::WithCleanupStart
            | Op::WithCleanupFinish => Flow::Next,
            Op::SetupAnnotations => {
                self.code.scratch.borrow_mut().annotated = true;
                Flow::Next
            }

            Op::PopTop => {
                self.pop_top();
                Flow::Next
            }
            Op::RotTwo => self.op_rot_two(addr),
            Op::RotThree => self.op_rot_three(addr),
            Op::DupTop => {
                let top = self.stack.borrow().peek();
                if let Some(entry) = top {
                    self.stack.borrow_mut().push_entry(entry);
                }
                Flow::Next
            }
            Op::DupTopTwo => {
                let pair = self.stack.borrow().peek_n(2);
                let mut stack = self.stack.borrow_mut();
                for entry in pair {
                    stack.push_entry(entry);
                }
                Flow::Next
            }

            Op::UnaryPositive => {
                self.unary(UnOp::Positive);
                Flow::Next
            }
            Op::UnaryNegative => {
                self.unary(UnOp::Negative);
                Flow::Next
            }
            Op::UnaryInvert => {
                self.unary(UnOp::Invert);
                Flow::Next
            }
            Op::UnaryNot => {
                self.unary(UnOp::Not);
                Flow::Next
            }

            Op::BinaryPower => {
                self.binary(BinOp::Power);
                Flow::Next
            }
            Op::BinaryMultiply => {
                self.binary(BinOp::Multiply);
                Flow::Next
            }
            Op::BinaryMatrixMultiply => {
                self.binary(BinOp::MatMultiply);
                Flow::Next
            }
            Op::BinaryTrueDivide => {
                self.binary(BinOp::Divide);
                Flow::Next
            }
            Op::BinaryFloorDivide => {
                self.binary(BinOp::FloorDivide);
                Flow::Next
            }
            Op::BinaryModulo => {
                self.binary(BinOp::Modulo);
                Flow::Next
            }
            Op::BinaryAdd => {
                self.binary(BinOp::Add);
                Flow::Next
            }
            Op::BinarySubtract => {
                self.binary(BinOp::Subtract);
                Flow::Next
            }
            Op::BinaryLshift => {
                self.binary(BinOp::Lshift);
                Flow::Next
            }
            Op::BinaryRshift => {
                self.binary(BinOp::Rshift);
                Flow::Next
            }
            Op::BinaryAnd => {
                self.binary(BinOp::And);
                Flow::Next
            }
            Op::BinaryXor => {
                self.binary(BinOp::Xor);
                Flow::Next
            }
            Op::BinaryOr => {
                self.binary(BinOp::Or);
                Flow::Next
            }

            Op::InplacePower => {
                self.inplace(BinOp::Power);
                Flow::Next
            }
            Op::InplaceMultiply => {
                self.inplace(BinOp::Multiply);
                Flow::Next
            }
            Op::InplaceMatrixMultiply => {
                self.inplace(BinOp::MatMultiply);
                Flow::Next
            }
            Op::InplaceTrueDivide => {
                self.inplace(BinOp::Divide);
                Flow::Next
            }
            Op::InplaceFloorDivide => {
                self.inplace(BinOp::FloorDivide);
                Flow::Next
            }
            Op::InplaceModulo => {
                self.inplace(BinOp::Modulo);
                Flow::Next
            }
            Op::InplaceAdd => {
                self.inplace(BinOp::Add);
                Flow::Next
            }
            Op::InplaceSubtract => {
                self.inplace(BinOp::Subtract);
                Flow::Next
            }
            Op::InplaceLshift => {
                self.inplace(BinOp::Lshift);
                Flow::Next
            }
            Op::InplaceRshift => {
                self.inplace(BinOp::Rshift);
                Flow::Next
            }
            Op::InplaceAnd => {
                self.inplace(BinOp::And);
                Flow::Next
            }
            Op::InplaceXor => {
                self.inplace(BinOp::Xor);
                Flow::Next
            }
            Op::InplaceOr => {
                self.inplace(BinOp::Or);
                Flow::Next
            }

            Op::BinarySubscr => {
                let (obj, sub) = self.pop2();
                self.push_expr(Expr::Subscript(Box::new(obj), Box::new(sub)));
                Flow::Next
            }
            Op::StoreSubscr => self.op_store_subscr(),
            Op::DeleteSubscr => {
                let (obj, sub) = self.pop2();
                let text = format!("del {}[{}]", obj.wrap_if(obj.precedence() < 15), sub);
                self.write(text);
                Flow::Next
            }

            Op::LoadConst => {
                let c = self.const_at(arg);
                self.push_expr(Expr::Const(c));
                Flow::Next
            }
            Op::LoadName => {
                let name = self.names(arg);
                self.push_expr(Expr::Name(name));
                Flow::Next
            }
            Op::StoreName => {
                let name = self.names(arg);
                self.store(Expr::Name(name));
                Flow::Next
            }
            Op::DeleteName => {
                let text = format!("del {}", self.names(arg));
                self.write(text);
                Flow::Next
            }
            Op::LoadFast => {
                let name = self.varname(arg);
                if name == ".0" {
                    // comprehension scopes receive their iterable as `.0`
                    let text = self.code.scratch.borrow().comp_iterable.clone();
                    self.push_expr(Expr::Name(text.unwrap_or_else(|| PLACEHOLDER.to_owned())));
                } else {
                    self.push_expr(Expr::Name(name));
                }
                Flow::Next
            }
            Op::StoreFast => {
                let name = self.varname(arg);
                self.store(Expr::Name(name));
                Flow::Next
            }
            Op::DeleteFast => {
                let text = format!("del {}", self.varname(arg));
                self.write(text);
                Flow::Next
            }
            Op::LoadGlobal => {
                let name = self.names(arg);
                self.code.ensure_global(&name);
                self.push_expr(Expr::Name(name));
                Flow::Next
            }
            Op::StoreGlobal => {
                let name = self.names(arg);
                self.code.declare_global(&name);
                self.store(Expr::Name(name));
                Flow::Next
            }
            Op::DeleteGlobal => {
                let name = self.names(arg);
                self.code.declare_global(&name);
                self.write(format!("del {name}"));
                Flow::Next
            }
            Op::LoadDeref | Op::LoadClassderef | Op::LoadClosure => {
                let name = self.derefname(arg);
                self.push_expr(Expr::Name(name));
                Flow::Next
            }
            Op::StoreDeref => {
                let name = self.derefname(arg);
                if !self.code.is_cellvar(arg as usize) {
                    self.code.declare_nonlocal(&name);
                }
                self.store(Expr::Name(name));
                Flow::Next
            }
            Op::DeleteDeref => {
                let name = self.derefname(arg);
                if !self.code.is_cellvar(arg as usize) {
                    self.code.declare_nonlocal(&name);
                }
                self.write(format!("del {name}"));
                Flow::Next
            }

            Op::LoadAttr | Op::LoadMethod => {
                let obj = self.pop_expr();
                let name = self.names(arg);
                self.push_expr(Expr::Attribute(Box::new(obj), name));
                Flow::Next
            }
            Op::StoreAttr => {
                let obj = self.pop_expr();
                let name = self.names(arg);
                self.store(Expr::Attribute(Box::new(obj), name));
                Flow::Next
            }
            Op::DeleteAttr => {
                let obj = self.pop_expr();
                let text = format!("del {}.{}", obj.wrap_if(obj.precedence() < 15), self.names(arg));
                self.write(text);
                Flow::Next
            }

            Op::ImportName => self.op_import_name(addr, arg),
            Op::ImportFrom => self.op_import_from(addr),
            Op::ImportStar => {
                self.pop_top();
                Flow::Next
            }

            Op::UnpackSequence => {
                self.start_unpack(arg as usize, None);
                Flow::Next
            }
            Op::UnpackEx => {
                let before = (arg & 0xff) as usize;
                let after = (arg >> 8) as usize;
                self.start_unpack(before + after + 1, Some(before));
                Flow::Next
            }

            Op::BuildTuple => {
                let values = self.pop_exprs(arg as usize);
                let wrap_lines = self.wrap_lines(addr);
                self.push_expr(Expr::Tuple { values, wrap_lines });
                Flow::Next
            }
            Op::BuildList => {
                let values = self.pop_exprs(arg as usize);
                let wrap_lines = self.wrap_lines(addr);
                self.push_expr(Expr::List { values, wrap_lines });
                Flow::Next
            }
            Op::BuildSet => {
                let values = self.pop_exprs(arg as usize);
                let wrap_lines = self.wrap_lines(addr);
                self.push_expr(Expr::Set { values, wrap_lines });
                Flow::Next
            }
            Op::BuildMap => {
                let mut items = Vec::with_capacity(arg as usize);
                for _ in 0..arg {
                    let (key, value) = self.pop2();
                    items.push(DictItem::Pair(key, value));
                }
                items.reverse();
                let wrap_lines = self.wrap_lines(addr);
                self.push_expr(Expr::Dict { items, wrap_lines });
                Flow::Next
            }
            Op::BuildConstKeyMap => {
                let keys = self.pop_expr();
                let values = self.pop_exprs(arg as usize);
                let keys = match keys {
                    Expr::Const(Const::Tuple(keys)) => keys,
                    _ => Vec::new(),
                };
                let items = keys
                    .into_iter()
                    .zip(values)
                    .map(|(k, v)| DictItem::Pair(Expr::Const(k), v))
                    .collect();
                let wrap_lines = self.wrap_lines(addr);
                self.push_expr(Expr::Dict { items, wrap_lines });
                Flow::Next
            }
            Op::BuildTupleUnpack => {
                let values = self.splat_values(arg as usize);
                self.push_expr(Expr::Tuple {
                    values,
                    wrap_lines: 1,
                });
                Flow::Next
            }
            Op::BuildListUnpack => {
                let values = self.splat_values(arg as usize);
                self.push_expr(Expr::List {
                    values,
                    wrap_lines: 1,
                });
                Flow::Next
            }
            Op::BuildSetUnpack => {
                let values = self.splat_values(arg as usize);
                self.push_expr(Expr::Set {
                    values,
                    wrap_lines: 1,
                });
                Flow::Next
            }
            Op::BuildMapUnpack => {
                let mut items = Vec::new();
                for e in self.pop_exprs(arg as usize) {
                    match e {
                        Expr::Dict {
                            items: mut inner, ..
                        } => items.append(&mut inner),
                        other => items.push(DictItem::Unpack(other)),
                    }
                }
                self.push_expr(Expr::Dict {
                    items,
                    wrap_lines: 1,
                });
                Flow::Next
            }
            Op::BuildTupleUnpackWithCall | Op::BuildMapUnpackWithCall => {
                let values = self.pop_exprs(arg as usize);
                self.push_val(Val::Args(values));
                Flow::Next
            }
            Op::BuildSlice => {
                let parts = self.pop_exprs(arg as usize);
                self.push_expr(Expr::Slice(parts));
                Flow::Next
            }
            Op::BuildString => {
                let parts = self.pop_exprs(arg as usize);
                self.push_expr(Expr::FString(parts));
                Flow::Next
            }
            Op::FormatValue => {
                let mut format = match arg & 3 {
                    1 => "!s".to_owned(),
                    2 => "!r".to_owned(),
                    3 => "!a".to_owned(),
                    _ => String::new(),
                };
                if arg & 4 != 0 {
                    let spec = match self.pop_expr() {
                        Expr::Const(Const::Str(s)) => s,
                        other => other.to_string(),
                    };
                    format.push(':');
                    format.push_str(&spec);
                }
                let value = self.pop_expr();
                self.push_expr(Expr::FormatValue {
                    value: Box::new(value),
                    format,
                });
                Flow::Next
            }

            Op::ListAppend | Op::SetAdd => {
                self.pop_top();
                Flow::Next
            }
            Op::MapAdd => {
                let (value, key) = self.pop2();
                self.push_expr(Expr::KeyValue(Box::new(key), Box::new(value)));
                self.pop_top();
                Flow::Next
            }
            Op::PrintExpr => {
                let e = self.pop_expr();
                self.write(e.to_string());
                Flow::Next
            }

            Op::RaiseVarargs => {
                match arg {
                    1 => {
                        let exc = self.pop_expr();
                        self.write(format!("raise {exc}"));
                    }
                    2 => {
                        let (exc, from_exc) = self.pop2();
                        self.write(format!("raise {exc} from {from_exc}"));
                    }
                    _ => self.write("raise"),
                }
                Flow::Next
            }

            Op::ReturnValue => self.op_return(addr),
            Op::YieldValue => {
                if self.code.name() != "<genexpr>" {
                    let value = self.pop_expr();
                    self.push_expr(Expr::Yield(Box::new(value)));
                }
                Flow::Next
            }
            Op::YieldFrom => {
                // TOS is the initial None sent into the delegate
                let _ = self.pop_entry();
                let value = self.pop_expr();
                self.push_expr(Expr::YieldFrom(Box::new(value)));
                Flow::Next
            }

            Op::LoadBuildClass => {
                self.push_val(Val::BuildClass);
                Flow::Next
            }
            Op::MakeFunction => self.op_make_function(arg),
            Op::CallFunction | Op::CallMethod => self.op_call_function(arg),
            Op::CallFunctionKw => self.op_call_function_kw(arg),
            Op::CallFunctionEx => self.op_call_function_ex(arg),

            Op::CompareOp => self.op_compare(addr, arg),

            Op::JumpForward => match self.jump(addr) {
                Some(j) => Flow::Jump(j),
                None => Flow::Next,
            },
            Op::JumpAbsolute => {
                if self.is_continue(addr) && self.starts_line(addr) {
                    self.write("continue");
                }
                Flow::Next
            }
            Op::JumpIfFalseOrPop => self.op_jump_if_false_or_pop(addr),
            Op::JumpIfTrueOrPop => self.op_jump_if_true_or_pop(addr),
            Op::PopJumpIfFalse => self.op_pop_jump_if(addr, false),
            Op::PopJumpIfTrue => self.op_pop_jump_if(addr, true),

            Op::ForIter => self.op_for_iter(addr),
            Op::SetupLoop => self.op_setup_loop(addr),
            Op::BreakLoop => {
                self.write("break");
                Flow::Next
            }
            Op::ContinueLoop => {
                self.write("continue");
                Flow::Next
            }

            Op::SetupFinally => self.op_setup_finally(addr),
            Op::SetupExcept => self.op_setup_except(addr),
            Op::EndFinally | Op::PopExcept => Flow::End,
            Op::SetupWith => self.op_setup_with(addr),

            Op::GetAwaitable => self.op_get_awaitable(addr),
            Op::GetAiter => Flow::Jump(addr + 2),
            Op::GetAnext => self.op_get_anext(addr),
            Op::BeforeAsyncWith => self.op_before_async_with(addr),
        }
    }

    fn wrap_lines(&self, addr: usize) -> u32 {
        self.code
            .implicit_continuation
            .get(&addr)
            .copied()
            .unwrap_or(1)
    }

    /// Flattens `BUILD_*_UNPACK` operands: same-shape literals splice
    /// in place, everything else becomes a starred element.
    fn splat_values(&mut self, count: usize) -> Vec<Expr> {
        let mut values = Vec::new();
        for e in self.pop_exprs(count) {
            match e {
                Expr::Tuple { values: mut v, .. } | Expr::List { values: mut v, .. } => {
                    values.append(&mut v)
                }
                Expr::Const(Const::Tuple(cs)) => values.extend(cs.into_iter().map(Expr::Const)),
                other => values.push(Expr::Starred(Box::new(other))),
            }
        }
        values
    }

    fn start_unpack(&mut self, count: usize, star_index: Option<usize>) {
        let Some(val) = self.pop_entry() else { return };
        let state = Rc::new(RefCell::new(UnpackState {
            val,
            count,
            star_index,
            dests: Vec::new(),
        }));
        let mut stack = self.stack.borrow_mut();
        for _ in 0..count {
            stack.push(Val::Unpack(Rc::clone(&state)));
        }
    }

    fn op_store_subscr(&mut self) -> Flow {
        let (obj, sub) = self.pop2();
        let annotated = self.code.scratch.borrow().annotated;
        let is_annotation = annotated
            && matches!(&obj, Expr::Name(n) if n == "__annotations__")
            && matches!(&sub, Expr::Const(Const::Str(_)));
        if is_annotation {
            let Expr::Const(Const::Str(name)) = sub else {
                return Flow::Next;
            };
            let ann = self.pop_expr();
            let ann_text = match &ann {
                Expr::Const(Const::Str(s)) if self.code.flags.future_annotations() => s.clone(),
                other => other.to_string(),
            };
            let annotated_name = format!("{name}: {ann_text}");
            // fold into `name: ann = value` when the assignment is the
            // statement just written
            let folded = match self.suite.statements.last_mut() {
                Some(Stmt::Assign(chain)) => match chain.first_mut() {
                    Some(Expr::Name(n)) if *n == name => {
                        *n = annotated_name.clone();
                        true
                    }
                    _ => false,
                },
                _ => false,
            };
            if !folded {
                self.write(annotated_name);
            }
            return Flow::Next;
        }
        self.store(Expr::Subscript(Box::new(obj), Box::new(sub)));
        Flow::Next
    }

    fn op_rot_two(&mut self, addr: usize) -> Flow {
        // `a, b = b, a` builds both values then swaps them in place
        if addr >= 1 && self.op(addr - 1).is_expr_producer() {
            let next_stmt = self.seek_fwd(
                addr,
                |o| o.is_unpack_terminator() || o.is_pop_jump() || o.is_else_jump_source(),
                None,
            );
            let next_stmt = match next_stmt {
                Some(n) if n <= self.end_block => Some(n),
                _ => self.bound_end(),
            };
            let first = self.seek_fwd(addr, |o| o.is_unpack_store(), next_stmt);
            let second =
                first.and_then(|f| self.seek_fwd(f, |o| o.is_unpack_store(), next_stmt));
            if first.is_some() && second.is_some() {
                let values = self.pop_exprs(2);
                let tuple = self.fresh_entry(Val::Expr(Expr::tuple(values)));
                let state = Rc::new(RefCell::new(UnpackState {
                    val: tuple,
                    count: 2,
                    star_index: None,
                    dests: Vec::new(),
                }));
                let mut stack = self.stack.borrow_mut();
                stack.push(Val::Unpack(Rc::clone(&state)));
                stack.push(Val::Unpack(state));
                return Flow::Next;
            }
        }
        let pair = self.stack.borrow_mut().pop_n(2);
        if pair.len() == 2 {
            let mut it = pair.into_iter();
            let below = it.next();
            let top = it.next();
            let mut stack = self.stack.borrow_mut();
            if let Some(top) = top {
                stack.push_entry(top);
            }
            if let Some(below) = below {
                stack.push_entry(below);
            }
        } else {
            let mut stack = self.stack.borrow_mut();
            for entry in pair {
                stack.push_entry(entry);
            }
        }
        Flow::Next
    }

    fn op_rot_three(&mut self, addr: usize) -> Flow {
        // chained comparisons rotate their operands themselves
        if addr >= 1
            && self.op(addr - 1) == Op::DupTop
            && self.op_is(addr + 1, Op::CompareOp)
            && matches!(
                self.op_at(addr + 2),
                Some(Op::JumpIfFalseOrPop | Op::PopJumpIfFalse | Op::PopJumpIfTrue)
            )
        {
            return Flow::Next;
        }
        if addr >= 1 && !self.op(addr - 1).is_inplace() {
            let next_stmt = self.seek_fwd(
                addr,
                |o| o.is_unpack_terminator() || o.is_pop_jump() || o.is_else_jump_source(),
                None,
            );
            let next_stmt = match next_stmt {
                Some(n) if n <= self.end_block => Some(n),
                _ => self.bound_end(),
            };
            let first = self.seek_fwd(addr + 1, |o| o.is_unpack_store(), next_stmt);
            let second =
                first.and_then(|f| self.seek_fwd(f, |o| o.is_unpack_store(), next_stmt));
            let third =
                second.and_then(|s| self.seek_fwd(s, |o| o.is_unpack_store(), next_stmt));
            if first.is_some() && second.is_some() && third.is_some() {
                let values = self.pop_exprs(3);
                let tuple = self.fresh_entry(Val::Expr(Expr::tuple(values)));
                let state = Rc::new(RefCell::new(UnpackState {
                    val: tuple,
                    count: 3,
                    star_index: None,
                    dests: Vec::new(),
                }));
                let mut stack = self.stack.borrow_mut();
                for _ in 0..3 {
                    stack.push(Val::Unpack(Rc::clone(&state)));
                }
                return Flow::Jump(addr + 2);
            }
        }
        let three = self.stack.borrow_mut().pop_n(3);
        if three.len() == 3 {
            let mut it = three.into_iter();
            let bottom = it.next();
            let middle = it.next();
            let top = it.next();
            let mut stack = self.stack.borrow_mut();
            if let Some(top) = top {
                stack.push_entry(top);
            }
            if let Some(bottom) = bottom {
                stack.push_entry(bottom);
            }
            if let Some(middle) = middle {
                stack.push_entry(middle);
            }
        } else {
            let mut stack = self.stack.borrow_mut();
            for entry in three {
                stack.push_entry(entry);
            }
        }
        Flow::Next
    }

    fn op_import_name(&mut self, addr: usize, arg: u32) -> Flow {
        let name = self.names(arg);
        let (level, fromlist) = self.pop2();
        let level = match level {
            Expr::Const(Const::Int(i)) if i > 0 => i as u32,
            _ => 0,
        };
        let fromlist = match fromlist {
            Expr::Const(Const::Tuple(items)) => {
                if items.len() == 1 && matches!(&items[0], Const::Str(s) if s == "*") {
                    FromList::Star
                } else {
                    FromList::Names(
                        items
                            .into_iter()
                            .map(|c| match c {
                                Const::Str(s) => s,
                                other => const_repr(&other),
                            })
                            .collect(),
                    )
                }
            }
            _ => FromList::Plain,
        };
        self.push_val(Val::Import(Rc::new(RefCell::new(ImportStmt::new(
            name, level, fromlist,
        )))));
        // `import a.b.c` binds the head name: skip the attribute chain so
        // the store pops the import itself
        let mut i = 1;
        while self.op_at(addr + i) == Some(Op::LoadAttr) {
            i += 1;
        }
        if i > 1
            && matches!(
                self.op_at(addr + i),
                Some(Op::StoreFast | Op::StoreName | Op::StoreDeref)
            )
        {
            return Flow::Jump(addr + i);
        }
        Flow::Next
    }

    fn op_import_from(&mut self, addr: usize) -> Flow {
        let parent = match self.stack.borrow().peek() {
            Some(Entry {
                val: Val::Import(imp),
                ..
            }) => Some(imp),
            _ => None,
        };
        match parent {
            Some(imp) => self.push_val(Val::ImportFrom(imp)),
            None => self.push_expr(Expr::name(PLACEHOLDER)),
        }
        if self.op_is(addr + 1, Op::RotTwo) {
            if let Some(store) = self.seek_fwd(
                addr,
                |o| matches!(o, Op::StoreName | Op::StoreFast | Op::StoreDeref),
                None,
            ) {
                return Flow::Jump(store);
            }
        }
        Flow::Next
    }

    fn op_return(&mut self, addr: usize) -> Flow {
        let value = self.pop_expr();
        let is_none = matches!(value, Expr::Const(Const::None));
        if self.code.flags.generator() && is_none && addr < 2 {
            // a generator that never reaches a yield still has to be one
            let mut body = Suite::default();
            body.add(Stmt::simple("yield None"));
            self.suite.add(Stmt::While(WhileStmt {
                cond: Expr::Const(Const::Bool(false)),
                body,
                else_body: None,
            }));
            return Flow::Next;
        }
        if is_none {
            let synthetic_yield = self.code.flags.generator()
                && !self
                    .code
                    .instrs
                    .iter()
                    .skip(1)
                    .any(|i| matches!(i.op, Op::YieldValue | Op::YieldFrom));
            if addr + 1 < self.len() || self.find_end_finally {
                self.write("return");
                if synthetic_yield {
                    self.write("yield");
                }
            } else if synthetic_yield && !(1..addr).any(|i| self.op(i) == Op::ReturnValue) {
                self.write("return");
                self.write("yield");
            }
            return Flow::Next;
        }
        if self.code.flags.iterable_coroutine() {
            self.write(format!("yield {value}"));
        } else {
            self.write(format!("return {value}"));
            if self.code.flags.generator() {
                self.write("yield");
            }
        }
        Flow::Next
    }
}

// Calls and callable construction.
impl Decompiler {
    fn op_call_function(&mut self, arg: u32) -> Flow {
        let posargs = self.stack.borrow_mut().pop_n(arg as usize);
        let Some(func) = self.pop_entry() else {
            self.push_expr(Expr::name(PLACEHOLDER));
            return Flow::Next;
        };
        self.call_core(func, posargs, Vec::new(), Vec::new(), Vec::new());
        Flow::Next
    }

    fn op_call_function_kw(&mut self, arg: u32) -> Flow {
        let keys = match self.pop_expr() {
            Expr::Const(Const::Tuple(keys)) => keys
                .into_iter()
                .map(|c| match c {
                    Const::Str(s) => s,
                    other => const_repr(&other),
                })
                .collect(),
            _ => Vec::new(),
        };
        let values = self.pop_exprs(keys.len());
        let posargs = self
            .stack
            .borrow_mut()
            .pop_n((arg as usize).saturating_sub(keys.len()));
        let Some(func) = self.pop_entry() else {
            self.push_expr(Expr::name(PLACEHOLDER));
            return Flow::Next;
        };
        let kwargs = keys.into_iter().zip(values).collect();
        self.call_core(func, posargs, kwargs, Vec::new(), Vec::new());
        Flow::Next
    }

    fn op_call_function_ex(&mut self, arg: u32) -> Flow {
        let varkw: Vec<Expr> = if arg & 1 != 0 {
            match self.pop_entry() {
                Some(Entry {
                    val: Val::Args(packs),
                    ..
                }) => packs,
                Some(Entry {
                    val: Val::Expr(e), ..
                }) => vec![e],
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let (posargs, varargs) = match self.pop_entry() {
            Some(Entry {
                val: Val::Expr(Expr::Tuple { values, .. }),
                ..
            }) => (values, Vec::new()),
            Some(Entry {
                val: Val::Args(mut packs),
                ..
            }) => match packs.first().cloned() {
                Some(Expr::Tuple { values, .. }) => {
                    packs.remove(0);
                    (values, packs)
                }
                Some(Expr::Const(Const::Tuple(cs))) => {
                    packs.remove(0);
                    (cs.into_iter().map(Expr::Const).collect(), packs)
                }
                _ => (Vec::new(), packs),
            },
            Some(Entry {
                val: Val::Expr(e), ..
            }) => (Vec::new(), vec![e]),
            _ => (Vec::new(), Vec::new()),
        };
        let Some(func) = self.pop_entry() else {
            self.push_expr(Expr::name(PLACEHOLDER));
            return Flow::Next;
        };
        let posargs = posargs
            .into_iter()
            .map(|e| self.fresh_entry(Val::Expr(e)))
            .collect();
        self.call_core(func, posargs, Vec::new(), varargs, varkw);
        Flow::Next
    }

    fn call_core(
        &mut self,
        func: Entry,
        posargs: Vec<Entry>,
        kwargs: Vec<(String, Expr)>,
        varargs: Vec<Expr>,
        varkw: Vec<Expr>,
    ) {
        let tag = func.tag;
        let func = match func.val {
            Val::BuildClass => {
                self.build_class(posargs, kwargs);
                return;
            }
            Val::Comp { kind, code } => {
                // the call supplies the outermost iterable of the
                // comprehension scope
                let iterable = posargs
                    .into_iter()
                    .next()
                    .map(entry_expr)
                    .unwrap_or_else(|| Expr::name(PLACEHOLDER));
                code.scratch.borrow_mut().comp_iterable = Some(iterable.to_string());
                let body = comp_body(&code, kind, &self.observer);
                self.push_expr(Expr::Comp { kind, body });
                return;
            }
            val => Entry { val, tag },
        };
        if posargs.len() == 1
            && kwargs.is_empty()
            && varargs.is_empty()
            && varkw.is_empty()
            && matches!(posargs[0].val, Val::Def { .. } | Val::Class(_))
        {
            // a def/class called with itself as sole argument is being
            // decorated
            let decorator = entry_expr(func);
            let target = posargs.into_iter().next().unwrap_or_else(|| {
                self.fresh_entry(Val::Expr(Expr::name(PLACEHOLDER)))
            });
            match &target.val {
                Val::Def { def, .. } => def.borrow_mut().decorators.push(decorator),
                Val::Class(class) => class.borrow_mut().decorators.push(decorator),
                _ => {}
            }
            self.stack.borrow_mut().push_entry(target);
            return;
        }
        let func = entry_expr(func);
        let mut args: Vec<CallArg> = Vec::new();
        args.extend(posargs.into_iter().map(|e| CallArg::Pos(entry_expr(e))));
        args.extend(varargs.into_iter().map(CallArg::Star));
        args.extend(kwargs.into_iter().map(|(k, v)| CallArg::Kw(k, v)));
        args.extend(varkw.into_iter().map(CallArg::DoubleStar));
        self.push_expr(Expr::Call {
            func: Box::new(func),
            args,
        });
    }

    /// `__build_class__(body, name, *parents, **kwargs)` becomes a class
    /// statement; the class body suite is rebuilt from the body code.
    fn build_class(&mut self, posargs: Vec<Entry>, kwargs: Vec<(String, Expr)>) {
        let mut it = posargs.into_iter();
        let body = it.next();
        let _name = it.next();
        let parents: Vec<Expr> = it.map(entry_expr).collect();
        let suite = match body.map(|e| e.val) {
            Some(Val::Def { code, .. }) => class_suite(&code, &self.observer),
            _ => Suite::default(),
        };
        self.push_val(Val::Class(Rc::new(RefCell::new(ClassStmt {
            name: None,
            parents,
            kwargs,
            suite,
            decorators: Vec::new(),
        }))));
    }

    fn op_make_function(&mut self, flags: u32) -> Flow {
        let _qualname = self.pop_expr();
        let code_obj = match self.pop_expr() {
            Expr::Const(Const::Code(obj)) => obj,
            _ => {
                self.push_expr(Expr::name(PLACEHOLDER));
                return Flow::Next;
            }
        };
        if flags & 0x08 != 0 {
            // closure cell tuple
            let _ = self.pop_entry();
        }
        let annotations: Vec<(String, String)> = if flags & 0x04 != 0 {
            let future = self.code.flags.future_annotations();
            match self.pop_expr() {
                Expr::Dict { items, .. } => items
                    .into_iter()
                    .filter_map(|item| match item {
                        DictItem::Pair(k, v) => {
                            let key = match k {
                                Expr::Const(Const::Str(s)) => s,
                                other => other.to_string(),
                            };
                            let value = match v {
                                Expr::Const(Const::Str(s)) if future => s,
                                other => other.to_string(),
                            };
                            Some((key, value))
                        }
                        DictItem::Unpack(_) => None,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let kwdefaults: Vec<(String, String)> = if flags & 0x02 != 0 {
            match self.pop_expr() {
                Expr::Dict { items, .. } => items
                    .into_iter()
                    .filter_map(|item| match item {
                        DictItem::Pair(k, v) => {
                            let key = match k {
                                Expr::Const(Const::Str(s)) => s,
                                other => other.to_string(),
                            };
                            Some((key, v.to_string()))
                        }
                        DictItem::Unpack(_) => None,
                    })
                    .collect(),
                _ => Vec::new(),
            }
        } else {
            Vec::new()
        };
        let defaults: Vec<String> = if flags & 0x01 != 0 {
            match self.pop_expr() {
                Expr::Tuple { values, .. } => values.iter().map(Expr::to_string).collect(),
                Expr::Const(Const::Tuple(cs)) => cs.iter().map(const_repr).collect(),
                other => vec![other.to_string()],
            }
        } else {
            Vec::new()
        };
        let child = match Code::new(*code_obj, Some(Rc::downgrade(&self.code))) {
            Ok(code) => Rc::new(code),
            Err(_) => {
                self.push_expr(Expr::name(PLACEHOLDER));
                return Flow::Next;
            }
        };
        let params = format_params(&child, &defaults, &kwdefaults, &annotations);
        let name = child.name().to_owned();
        match name.as_str() {
            "<lambda>" => {
                let body = lambda_body(&child, &self.observer);
                self.push_expr(Expr::Lambda { params, body });
            }
            "<listcomp>" => self.push_val(Val::Comp {
                kind: CompKind::List,
                code: child,
            }),
            "<setcomp>" => self.push_val(Val::Comp {
                kind: CompKind::Set,
                code: child,
            }),
            "<dictcomp>" => self.push_val(Val::Comp {
                kind: CompKind::Dict,
                code: child,
            }),
            "<genexpr>" => self.push_val(Val::Comp {
                kind: CompKind::Generator,
                code: child,
            }),
            _ => {
                let ret = annotations
                    .iter()
                    .find(|(k, _)| k == "return")
                    .map(|(_, v)| v.clone());
                let docstring = match child.obj.consts.first() {
                    Some(Const::Str(s)) => Some(s.clone()),
                    _ => None,
                };
                let is_async = child.flags.coroutine() || child.flags.async_generator();
                let suite = code_suite(&child, true, false, &self.observer);
                let def = DefStmt {
                    name: None,
                    params,
                    ret,
                    docstring,
                    suite,
                    is_async,
                    decorators: Vec::new(),
                };
                self.push_val(Val::Def {
                    def: Rc::new(RefCell::new(def)),
                    code: child,
                });
            }
        }
        Flow::Next
    }
}

/// Renders a parameter list from the argument layout of `co_varnames`:
/// positionals, keyword-onlies behind `*`, then `*args` and `**kwargs`.
fn format_params(
    code: &Rc<Code>,
    defaults: &[String],
    kwdefaults: &[(String, String)],
    annotations: &[(String, String)],
) -> String {
    let obj = &code.obj;
    let argc = obj.arg_count as usize;
    let kwonly = obj.kwonly_arg_count as usize;
    let ann = |name: &str| {
        annotations
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    let mut parts: Vec<String> = Vec::new();
    let plain = argc.saturating_sub(defaults.len());
    for i in 0..argc {
        let name = obj.varnames.get(i).cloned().unwrap_or_default();
        let mut part = name.clone();
        if let Some(a) = ann(&name) {
            part.push(':');
            part.push_str(a);
        }
        if i >= plain {
            part.push('=');
            part.push_str(&defaults[i - plain]);
        }
        parts.push(part);
    }
    if code.flags.varargs() {
        let name = obj.varnames.get(argc + kwonly).cloned().unwrap_or_default();
        let mut part = format!("*{name}");
        if let Some(a) = ann(&name) {
            part.push(':');
            part.push_str(a);
        }
        parts.push(part);
    } else if kwonly > 0 {
        parts.push("*".to_owned());
    }
    for i in 0..kwonly {
        let name = obj.varnames.get(argc + i).cloned().unwrap_or_default();
        let mut part = name.clone();
        if let Some(a) = ann(&name) {
            part.push(':');
            part.push_str(a);
        }
        if let Some((_, d)) = kwdefaults.iter().find(|(k, _)| k == &name) {
            part.push('=');
            part.push_str(d);
        }
        parts.push(part);
    }
    if code.flags.varkwargs() {
        let offset = argc + kwonly + usize::from(code.flags.varargs());
        let name = obj.varnames.get(offset).cloned().unwrap_or_default();
        let mut part = format!("**{name}");
        if let Some(a) = ann(&name) {
            part.push(':');
            part.push_str(a);
        }
        parts.push(part);
    }
    parts.join(", ")
}

fn stmt_text(stmt: &Stmt) -> String {
    match stmt {
        Stmt::Simple(text) => text.clone(),
        other => {
            let suite = Suite {
                statements: vec![other.clone()],
            };
            suite.to_source(4).trim_end().to_owned()
        }
    }
}

fn strip_return(text: &str) -> String {
    match text.strip_prefix("return") {
        Some(rest) => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                "None".to_owned()
            } else {
                rest.to_owned()
            }
        }
        None => text.to_owned(),
    }
}

fn suite_head_text(suite: &Suite) -> String {
    match suite.statements.first() {
        Some(stmt) => stmt_text(stmt),
        None => "None".to_owned(),
    }
}

/// Inline body text of a `lambda`: the suite's single return, or a
/// conditional expression folded from an if/else pair.
fn lambda_body(code: &Rc<Code>, observer: &Rc<dyn Observer>) -> String {
    let suite = code_suite(code, false, false, observer);
    match suite.statements.first() {
        Some(Stmt::If(s)) => {
            let on_true = strip_return(&suite_head_text(&s.true_suite));
            let on_false = match suite.statements.get(1) {
                Some(stmt) => strip_return(&stmt_text(stmt)),
                None => "None".to_owned(),
            };
            format!("{} if {} else {}", on_true, s.cond, on_false)
        }
        Some(stmt) => {
            let body = strip_return(&stmt_text(stmt));
            if body == "yield None" {
                "(yield)".to_owned()
            } else {
                body
            }
        }
        None => "None".to_owned(),
    }
}

/// Pipeline text of a comprehension scope. Non-generator scopes skip
/// the leading iterable load and the trailing return.
fn comp_body(code: &Rc<Code>, kind: CompKind, observer: &Rc<dyn Observer>) -> String {
    let (start, end) = if kind == CompKind::Generator {
        (0, None)
    } else {
        (1, Some(code.instrs.len().saturating_sub(1)))
    };
    let mut d = Decompiler::new_range(code, start, end, None, observer);
    d.run();
    d.suite.gen_display(&[])
}

/// Decompiles a whole code unit into a suite. `include_declarations`
/// prepends the `global`/`nonlocal` statements collected while walking;
/// `look_for_docstring` rewrites a leading `__doc__` assignment.
fn code_suite(
    code: &Rc<Code>,
    include_declarations: bool,
    look_for_docstring: bool,
    observer: &Rc<dyn Observer>,
) -> Suite {
    observer.enter_scope(code.name());
    let mut d = Decompiler::new_range(code, 0, None, None, observer);
    d.run();
    observer.exit_scope(code.name());
    let mut suite = d.suite;
    if look_for_docstring {
        let docstring = match suite.statements.first() {
            Some(Stmt::Assign(chain)) if chain.len() == 2 => {
                match (&chain[0], &chain[1]) {
                    (Expr::Name(n), Expr::Const(Const::Str(text))) if n == "__doc__" => {
                        Some(text.clone())
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        if let Some(text) = docstring {
            suite.statements[0] = Stmt::DocString(text);
        }
    }
    if include_declarations {
        let scratch = code.scratch.borrow();
        let mut decls = Vec::new();
        if !scratch.globals.is_empty() {
            decls.push(Stmt::Simple(format!(
                "global {}",
                scratch.globals.join(", ")
            )));
        }
        if !scratch.nonlocals.is_empty() {
            decls.push(Stmt::Simple(format!(
                "nonlocal {}",
                scratch.nonlocals.join(", ")
            )));
        }
        if !decls.is_empty() {
            decls.append(&mut suite.statements);
            suite.statements = decls;
        }
    }
    suite
}

/// Class bodies drop the compiler-injected `__module__`/`__qualname__`
/// assignments and the trailing implicit return.
fn class_suite(code: &Rc<Code>, observer: &Rc<dyn Observer>) -> Suite {
    let mut suite = code_suite(code, true, true, observer);
    if suite
        .statements
        .last()
        .is_some_and(|s| s.simple_starts_with("return"))
    {
        suite.statements.pop();
    }
    suite.statements.retain(|stmt| match stmt {
        Stmt::Assign(chain) => !matches!(
            chain.first(),
            Some(Expr::Name(n)) if n == "__module__" || n == "__qualname__"
        ),
        _ => true,
    });
    suite
}

/// Decompiles a module-level code unit.
pub fn module_suite(code: &Rc<Code>) -> Suite {
    let observer: Rc<dyn Observer> = Rc::new(NullObserver);
    module_suite_with(code, &observer)
}

/// Decompiles a module-level code unit, reporting scope transitions and
/// diagnostics to `observer`.
pub fn module_suite_with(code: &Rc<Code>, observer: &Rc<dyn Observer>) -> Suite {
    code_suite(code, false, true, observer)
}

// Conditional jumps. A pop-jump either contributes to a boolean chain or
// marks a statement boundary; the analyzer's jump classification decides
// which, and the merge table in `push_popjump` folds the chains.
impl Decompiler {
    fn add_if(&mut self, cond: Expr, true_suite: Suite, false_suite: Option<Suite>) {
        self.suite.add(Stmt::If(IfStmt {
            cond,
            true_suite,
            false_suite,
        }));
    }

    fn op_compare(&mut self, addr: usize, arg: u32) -> Flow {
        let Some(cmp) = CmpOp::from_arg(arg) else {
            self.push_expr(Expr::name(PLACEHOLDER));
            return Flow::Next;
        };
        if cmp != CmpOp::ExcMatch {
            let (left, right) = self.pop2();
            self.push_expr(Expr::Compare {
                operands: vec![left, right],
                ops: vec![cmp],
            });
            return Flow::Next;
        }
        // exception dispatch: the stack holds the try statement under
        // construction and the matched exception type
        let mut popped = self.stack.borrow_mut().pop_n(2);
        let exc_type = popped
            .pop()
            .map(entry_expr)
            .unwrap_or_else(|| Expr::name(PLACEHOLDER));
        let tryobj = match popped.pop() {
            Some(Entry {
                val: Val::Try(t), ..
            }) => t,
            _ => return Flow::End,
        };
        let Some(next_se) = self.jump(addr + 1) else {
            return Flow::End;
        };
        tryobj.borrow_mut().next_start_except = Some(next_se);
        let (except_start, except_end) = if self.op_is(addr + 5, Op::SetupFinally) {
            (addr + 6, self.jump(addr + 5).unwrap_or(next_se))
        } else {
            (addr + 5, next_se)
        };
        let mut d_body = self.sub(except_start, except_end);
        d_body.run();
        tryobj.borrow_mut().add_clause(Some(exc_type), d_body.suite);
        if self.op_at(addr + 3) != Some(Op::PopTop) {
            // the clause binds the exception to a name
            let mut d_name = self.sub(addr + 3, addr + 4);
            d_name
                .stack
                .borrow_mut()
                .push(Val::Try(Rc::clone(&tryobj)));
            d_name.run();
        }
        Flow::End
    }

    fn op_jump_if_false_or_pop(&mut self, addr: usize) -> Flow {
        let Some(end_addr) = self.jump(addr) else {
            return Flow::Next;
        };
        // a comparison chain spreads its links over DUP_TOP/ROT_THREE
        // triples that all bail to the same or-pop target
        if addr >= 3
            && self.op(addr - 1) == Op::CompareOp
            && self.op(addr - 2) == Op::RotThree
            && self.op(addr - 3) == Op::DupTop
        {
            let mut cond = self.pop_expr();
            let mut start = addr + 1;
            let mut cur = addr + 1;
            while cur < end_addr {
                if cur >= 2
                    && self.op(cur) == Op::CompareOp
                    && self.op(cur - 2) == Op::DupTop
                    && self.op(cur - 1) == Op::RotThree
                    && self.op_is(cur + 1, Op::JumpIfFalseOrPop)
                    && self.arg(cur + 1) == self.arg(addr)
                {
                    let mut d = self.sub_shared(start, cur + 1);
                    d.run();
                    let link = self.pop_expr();
                    cond = cond.chain_compare(link);
                    start = cur + 2;
                }
                cur += 1;
            }
            let mut d = self.sub_shared(start, end_addr.saturating_sub(1));
            d.run();
            let link = self.pop_expr();
            cond = cond.chain_compare(link);
            self.push_expr(cond);
            return Flow::Jump(end_addr + 2);
        }
        let raw = self.pop_expr();
        self.push_popjump(false, end_addr, raw, addr);
        let left = self.pop_popjump();
        let mut d = self.sub_shared(addr + 1, end_addr);
        d.run();
        let right = self.pop_expr();
        self.push_expr(Self::mk_bool(true, left, right, None));
        Flow::Jump(end_addr)
    }

    fn op_jump_if_true_or_pop(&mut self, addr: usize) -> Flow {
        let Some(end_addr) = self.jump(addr) else {
            return Flow::Next;
        };
        let raw = self.pop_expr();
        self.push_popjump(true, end_addr, raw, addr);
        let left = self.pop_popjump();
        let mut d = self.sub_shared(addr + 1, end_addr);
        d.run();
        let right = self.pop_expr();
        self.push_expr(Self::mk_bool(false, left, right, None));
        Flow::Jump(end_addr)
    }

    /// Pop-jump whose branches fold into a conditional expression.
    fn op_ternary(&mut self, addr: usize, truth: bool, jump_addr: usize, cond: Expr) -> Flow {
        let next = addr + 1;
        let x0 = jump_addr.saturating_sub(1);
        self.push_popjump(truth, jump_addr, cond, addr);
        let cond = self.pop_popjump();
        if self.op(x0) == Op::ReturnValue {
            let mut d_true = self.sub(next, x0);
            d_true.run();
            let on_true = d_true.pop_expr();
            let mut end_false = self.end_block;
            if self.op(end_false) != Op::ReturnValue {
                match self.seek_back(self.end_block, |o| o == Op::ReturnValue, Some(jump_addr)) {
                    Some(r) => end_false = r,
                    None => {
                        if self.op_is(self.end_block + 1, Op::ReturnValue) {
                            end_false = self.end_block + 1;
                        }
                    }
                }
            }
            let mut d_false = self.sub(jump_addr, end_false);
            d_false.expression_in_result = true;
            let stop = d_false.run();
            let on_false = d_false.pop_expr();
            if stop < end_false {
                end_false = stop;
            }
            self.push_expr(Expr::IfElse {
                cond: Box::new(cond),
                on_true: Box::new(on_true),
                on_false: Box::new(on_false),
            });
            return Flow::Jump(end_false);
        }
        let mut next_jump = self.jump(x0);
        let on_true = if addr + 2 == jump_addr {
            Expr::Const(Const::Bool(true))
        } else {
            let mut end_true = jump_addr - 2;
            if self.op(end_true).is_pop_jump() {
                next_jump = Some(end_true);
            } else {
                end_true = x0;
            }
            let mut d_true = self.sub(next, end_true);
            d_true.run();
            d_true.pop_expr()
        };
        if self.arg(x0) == 0 {
            let ternary = Expr::IfElse {
                cond: Box::new(cond),
                on_true: Box::new(on_true),
                on_false: Box::new(Expr::Const(Const::Bool(true))),
            };
            if addr + 2 == jump_addr {
                // the folded condition guards the statement that follows
                let mut d_rest = self.sub_to_end(x0 + 1);
                d_rest.run();
                self.push_popjump(truth, self.end_block, ternary, addr);
                let folded = self.pop_popjump();
                let mut rest = d_rest.suite.statements;
                let first = if rest.is_empty() {
                    Suite::default()
                } else {
                    Suite {
                        statements: vec![rest.remove(0)],
                    }
                };
                self.add_if(folded, first, None);
                self.suite.statements.extend(rest);
                return Flow::End;
            }
            self.push_popjump(truth, self.end_block, ternary, addr);
            let folded = self.pop_popjump();
            self.push_expr(folded);
            return match next_jump {
                Some(j) => Flow::Jump(j),
                None => Flow::Next,
            };
        }
        let Some(xj) = self.jump(x0) else {
            return Flow::Next;
        };
        let mut end_false = xj.saturating_sub(1);
        if self.op(end_false).is_pop_jump() {
            next_jump = Some(end_false);
        } else {
            end_false = xj;
        }
        let mut d_false = self.sub(jump_addr, end_false);
        d_false.run();
        let on_false = d_false.pop_expr();
        self.push_expr(Expr::IfElse {
            cond: Box::new(cond),
            on_true: Box::new(on_true),
            on_false: Box::new(on_false),
        });
        match next_jump {
            Some(j) => Flow::Jump(j),
            None => Flow::Next,
        }
    }

    fn op_pop_jump_if(&mut self, addr: usize, truth: bool) -> Flow {
        let Some(j_addr) = self.jump(addr) else {
            return Flow::Next;
        };
        let mut next = addr + 1;

        // jump to the fall-through: a condition with an empty body
        if j_addr == next {
            let raw = self.pop_expr();
            self.push_popjump(truth, j_addr, raw, addr);
            let cond = self.pop_popjump();
            self.add_if(cond, Suite::default(), None);
            return Flow::Jump(next);
        }

        let span = self.last_loop(addr);
        let in_loop = span.is_some();
        let (is_loop_condition, loop_end) = match span {
            Some(s) => {
                let end_cond = match s.kind {
                    LoopKind::While { end_cond } => end_cond,
                    LoopKind::For | LoopKind::WhileTrue => 0,
                };
                (end_cond > 0 && addr <= end_cond, s.end)
            }
            None => (false, 0),
        };

        // a quasi-continue may really target a later statement jump's
        // chain, or reach the loop header through FOR_ITER/SETUP_LOOP
        let mut jump_addr = j_addr;
        if self.is_continue(addr) && !self.code.is_statement_jump(addr) {
            let c = {
                let scratch = self.code.scratch.borrow();
                scratch
                    .statement_jumps
                    .iter()
                    .copied()
                    .filter(|&s| s > addr && s < self.end_block)
                    .min()
            };
            let x = c.map(|c| {
                if matches!(self.code.chain_jumps.get(&c), Some(ChainPos::End)) {
                    if self.op(c) == Op::PopJumpIfTrue {
                        c + 3
                    } else {
                        c + 4
                    }
                } else {
                    c + 1
                }
            });
            if let (Some(c), Some(x)) = (c, x)
                && self.is_continue(x)
                && (truth || !self.is_continue(c))
            {
                jump_addr = x;
            } else if self.op_at(jump_addr) == Some(Op::ForIter) {
                if let Some(j) = self.jump(jump_addr) {
                    jump_addr = j;
                }
            } else if jump_addr >= 1 && self.op(jump_addr - 1) == Op::SetupLoop {
                if let Some(j) = self.jump(jump_addr - 1) {
                    jump_addr = j.saturating_sub(1);
                }
            }
        }

        let mut cond = self.pop_expr();
        match self.code.chain_jumps.get(&addr).copied() {
            Some(ChainPos::Start) => {
                self.push_popjump(truth, jump_addr, cond, addr);
                return Flow::Next;
            }
            Some(ChainPos::Inner) => {
                let prev = self.pop_popjump();
                let chained = prev.chain_compare(cond);
                self.push_popjump(false, jump_addr, chained, addr);
                return Flow::Next;
            }
            Some(ChainPos::End) => {
                let prev = self.pop_popjump();
                cond = prev.chain_compare(cond);
            }
            None => {}
        }

        if self.code.ternary_jumps.contains(&addr) {
            return self.op_ternary(addr, truth, jump_addr, cond);
        }

        // plain statement `if` with no else branch
        if !self.is_else_jump(addr) && (is_loop_condition || !self.is_continue(addr)) {
            let mut pass_addr = None;
            let mut replace_addr = None;
            if !is_loop_condition && !self.is_continue(addr) {
                let mut x = addr + 1;
                while x < self.end_block {
                    if self.code.is_statement_at(x) {
                        break;
                    }
                    if self.op(x) == Op::JumpForward && self.starts_line(x) {
                        pass_addr = Some(x);
                        replace_addr = self.jump(x);
                        if replace_addr == Some(j_addr) {
                            jump_addr = x;
                        }
                        break;
                    }
                    x += 1;
                }
            }
            self.push_popjump(truth, jump_addr, cond, addr);
            if !self.code.is_statement_jump(addr) {
                return Flow::Next;
            }
            if self.seek_fwd(jump_addr, |o| o == Op::MapAdd, None).is_some() {
                return Flow::Next;
            }
            if self.code.name() == "<lambda>" {
                return Flow::Next;
            }
            if jump_addr >= 2
                && self
                    .seek_back(
                        jump_addr,
                        |o| matches!(o, Op::JumpIfTrueOrPop | Op::JumpIfFalseOrPop),
                        Some(jump_addr - 2),
                    )
                    .is_some()
            {
                return Flow::Next;
            }
            if self.code.name() == "<genexpr>"
                && self.op_at(jump_addr) != Some(Op::EndFinally)
                && self.op_at(jump_addr + 1) == Some(Op::JumpAbsolute)
            {
                return Flow::Next;
            }
            let mut end_true = jump_addr;
            if self.bounded && jump_addr > self.end {
                end_true = self.end;
            } else if !is_loop_condition {
                // a branch inside the body that escapes past the target
                // means this jump is part of a larger condition
                let x = self.seek_stmt(next, Some(jump_addr)).unwrap_or(jump_addr);
                for na in next..x {
                    if self.op(na).is_pop_jump() {
                        let Some(mut nj) = self.jump(na) else { continue };
                        if replace_addr == Some(nj)
                            && let Some(p) = pass_addr
                        {
                            nj = p;
                        }
                        if nj > jump_addr || (nj >= 1 && self.op(nj - 1) == Op::SetupLoop) {
                            return Flow::Next;
                        }
                        if na + 1 == jump_addr && self.arg(addr) != self.arg(na) {
                            return Flow::Next;
                        }
                        if self.op_at(nj) == Some(Op::ForIter) {
                            return Flow::Next;
                        }
                    } else if matches!(self.op(na), Op::JumpIfTrueOrPop | Op::JumpIfFalseOrPop) {
                        let Some(nj) = self.jump(na) else { continue };
                        if nj > jump_addr
                            || (nj == jump_addr
                                && jump_addr >= 1
                                && self.op(jump_addr - 1).is_else_jump_source())
                        {
                            return Flow::Next;
                        }
                    }
                }
            }
            let cond = self.pop_popjump();
            let mut d_true = self.sub(addr + 1, end_true);
            d_true.run();
            self.add_if(cond, d_true.suite, None);
            return Flow::Jump(end_true);
        }

        if !self.code.is_statement_jump(addr) {
            self.push_popjump(truth, jump_addr, cond, addr);
            return Flow::Next;
        }

        let end_true = if self.bounded && jump_addr > self.end && jump_addr == j_addr {
            self.end
        } else {
            jump_addr.saturating_sub(1)
        };

        // an identity test guarding a continue may fold with a later
        // continue jump instead of opening a statement
        if truth && self.is_continue(addr) && cond.starts_with_identity_cmp() {
            let mut c = next;
            while c <= self.end_block && c < self.len() {
                if self.code.is_statement_at(c) {
                    break;
                }
                if self.op(c) == Op::JumpAbsolute {
                    if self.is_continue(c) {
                        self.push_popjump(truth, c, cond, addr);
                        return Flow::Next;
                    }
                    break;
                }
                c += 1;
            }
        }

        // `if cond: pass else: ...` inside a loop
        if in_loop
            && !is_loop_condition
            && !truth
            && self.is_else_jump(addr)
            && next < self.end_block
            && self.starts_line(next)
            && (self.op(next) == Op::JumpForward
                || (self.op(next) == Op::JumpAbsolute && self.is_continue(next)))
        {
            if let Some(far) = self.farthest_popjump_target()
                && far != jump_addr
                && far > next
            {
                let x = addr + 2;
                if !self.is_continue(addr)
                    || (self.op_at(x) == Some(Op::JumpAbsolute) && self.is_continue(x))
                {
                    let d_false_suite = if x == far {
                        Suite::default()
                    } else {
                        let mut d = self.sub(x, far);
                        d.run();
                        d.suite
                    };
                    let cond = self.if_pass_cond(truth, jump_addr, cond, addr, next, far);
                    self.add_if(cond, Suite::default(), Some(d_false_suite));
                    return if far == self.end_block {
                        Flow::End
                    } else {
                        Flow::Jump(far)
                    };
                }
            }
        }

        self.push_popjump(truth, jump_addr, cond, addr);
        let cond = self.pop_popjump();

        if matches!(self.code.chain_jumps.get(&addr), Some(ChainPos::End))
            && matches!(self.op_at(next), Some(Op::JumpAbsolute | Op::JumpForward))
            && self.op_at(next + 1) == Some(Op::PopTop)
        {
            next = if truth { next + 2 } else { next + 3 };
        }

        // conditional continue: the body runs to a jump back to the loop
        if in_loop && self.is_continue(addr) {
            let mut d_true = self.sub_to_end(next);
            d_true.scan_for_else = true;
            let et = d_true.run();
            if et < self.end_block {
                match self.op(et) {
                    Op::JumpForward => {
                        let end = self.jump(et).unwrap_or(self.end_block);
                        let mut d_false = self.sub(et + 1, end);
                        d_false.run();
                        self.add_if(cond, d_true.suite, Some(d_false.suite));
                        return Flow::Jump(end);
                    }
                    Op::JumpAbsolute | Op::ReturnValue => {
                        let mut d_false = self.sub_to_end(et + 1);
                        d_false.run();
                        let x = d_false.suite.len();
                        if x < 2 {
                            if x == 1 {
                                if self.starts_line(self.end_block)
                                    && self.bounded
                                    && self.end == loop_end
                                {
                                    d_false.suite.statements[0] = Stmt::Simple("pass".to_owned());
                                    self.add_if(cond, d_true.suite, Some(d_false.suite));
                                } else if self.op(et) == Op::JumpAbsolute && !self.starts_line(et)
                                {
                                    self.add_if(cond, d_true.suite, Some(d_false.suite));
                                } else {
                                    self.add_if(cond, d_true.suite, None);
                                    self.suite.statements.extend(d_false.suite.statements);
                                }
                            } else {
                                self.add_if(cond, d_true.suite, None);
                            }
                            return Flow::End;
                        }
                        let mut c = 0usize;
                        let mut end_false = None;
                        for (i, stmt) in d_false.suite.statements.iter().enumerate() {
                            if stmt.is_simple_eq("continue") {
                                c = i;
                            }
                            if stmt.simple_starts_with("return") {
                                end_false = Some(i + 1);
                                break;
                            }
                        }
                        let mut end_false = match end_false {
                            Some(ef) => ef,
                            None if c == 0 => {
                                if self.starts_line(self.end_block)
                                    && self.op(self.end_block) == Op::JumpAbsolute
                                {
                                    self.add_if(cond, d_true.suite, None);
                                    self.suite.statements.extend(d_false.suite.statements);
                                } else {
                                    self.add_if(cond, d_true.suite, Some(d_false.suite));
                                }
                                return Flow::End;
                            }
                            None => c,
                        };
                        if end_false == x && self.op(self.end_block) == Op::ReturnValue {
                            if c == 0 {
                                self.add_if(cond, d_true.suite, None);
                                self.suite.statements.extend(d_false.suite.statements);
                                return Flow::End;
                            }
                            end_false = c;
                        }
                        let tail = d_false.suite.statements.split_off(end_false);
                        self.add_if(cond, d_true.suite, Some(d_false.suite));
                        self.suite.statements.extend(tail);
                        return Flow::End;
                    }
                    _ => {
                        self.add_if(cond, d_true.suite, None);
                        return Flow::End;
                    }
                }
            }
            // the body covers the rest of the block
            let x = d_true.suite.len();
            if x < 2 {
                if x == 1 && next == self.end_block && self.is_continue(next) {
                    d_true.suite.statements[0] = Stmt::Simple("pass".to_owned());
                }
                self.add_if(cond, d_true.suite, None);
                return Flow::End;
            }
            if let Some(i) = (1..x).find(|&i| d_true.suite.statements[i].is_simple_eq("continue"))
            {
                let tail = d_true.suite.statements.split_off(i);
                self.add_if(cond, d_true.suite, None);
                self.suite.statements.extend(tail);
            } else {
                self.add_if(cond, d_true.suite, None);
            }
            return Flow::End;
        }

        // body ends in a return: the else suite may really be the
        // statements that follow the if
        if self.op(end_true) == Op::ReturnValue
            && !self.is_continue(addr)
            && j_addr <= self.end_block
        {
            let mut d_true = self.sub(next, end_true + 1);
            d_true.run();
            let tail_ok = d_true
                .suite
                .statements
                .last()
                .is_some_and(|s| s.simple_starts_with("return") || s.is_simple_eq("yield"));
            if !tail_ok {
                self.add_if(cond, d_true.suite, None);
                return Flow::Jump(j_addr);
            }
            let mut d_false = self.sub_to_end(j_addr);
            d_false.run();
            let x = d_false.suite.len();
            for i in 0..x {
                if !d_false.suite.statements[i].simple_starts_with("return") {
                    continue;
                }
                let mut i = i;
                if i + 1 < x && d_false.suite.statements[i + 1].is_simple_eq("yield") {
                    i += 1;
                }
                if i + 1 < x {
                    let tail = d_false.suite.statements.split_off(i + 1);
                    self.add_if(cond, d_true.suite, Some(d_false.suite));
                    self.suite.statements.extend(tail);
                    return Flow::End;
                }
                // trailing return; keep the else only when the return is
                // not the scope's implicit `return None`
                let c2 = self.end_block + 1;
                let mut done = self.op(self.end_block) != Op::ReturnValue
                    || (c2 < self.len()
                        && (self.op(c2) == Op::JumpForward
                            || (self.op(c2) == Op::JumpAbsolute && !self.starts_line(c2))));
                if !done && !self.bounded && self.end_block >= 1 {
                    let cb = self.end_block - 1;
                    let plain_load = self.op(cb) == Op::LoadConst
                        && (cb == 0
                            || !matches!(
                                self.op(cb - 1),
                                Op::JumpIfTrueOrPop | Op::JumpIfFalseOrPop
                            ))
                        && self.const_at(self.arg(cb)).is_none();
                    if plain_load {
                        done = if self.code.flags.generator() {
                            self.seek_fwd(0, |o| o == Op::ReturnValue, Some(cb)).is_some()
                        } else {
                            !self.starts_line(cb)
                        };
                        if done
                            && self
                                .code
                                .ternary_jumps
                                .iter()
                                .any(|&t| self.code.jump_index(t) == Some(cb))
                        {
                            done = false;
                        }
                    }
                }
                if done {
                    self.add_if(cond, d_true.suite, Some(d_false.suite));
                    return Flow::End;
                }
                break;
            }
            self.add_if(cond, d_true.suite, None);
            self.suite.statements.extend(d_false.suite.statements);
            return Flow::End;
        }

        if matches!(self.op(end_true), Op::RaiseVarargs | Op::PopTop) {
            let mut d_true = self.sub(next, end_true + 1);
            d_true.run();
            self.add_if(cond, d_true.suite, Some(Suite::default()));
            return Flow::Jump(jump_addr);
        }

        // jump past the block end: the whole tail is the body, possibly
        // split at a return that really closes the scope
        if j_addr > self.end_block {
            let mut d_true = self.sub_to_end(next);
            d_true.run();
            let x = d_true.suite.len();
            let mut end_t = None;
            for i in 0..x {
                if d_true.suite.statements[i].simple_starts_with("return") {
                    if i + 2 < x || self.is_continue(self.end_block) {
                        end_t = Some(i);
                    } else if i + 2 == x && !d_true.suite.statements[i + 1].is_simple_eq("yield") {
                        end_t = Some(i + 1);
                    }
                    break;
                }
            }
            match end_t {
                None => {
                    if self.op(self.end_block) == Op::JumpForward
                        && self.arg(self.end_block) == 0
                    {
                        self.add_if(cond, d_true.suite, Some(Suite::default()));
                    } else {
                        self.add_if(cond, d_true.suite, None);
                    }
                }
                Some(t) => {
                    let tail = d_true.suite.statements.split_off(t + 1);
                    self.add_if(cond, d_true.suite, None);
                    self.suite.statements.extend(tail);
                }
            }
            return Flow::End;
        }

        // body ending on a continue jump inside a loop
        if in_loop && !is_loop_condition && self.is_continue(end_true) {
            let mut d_true = self.sub(next, j_addr);
            if self.starts_line(end_true) {
                if next + 1 == j_addr && self.bounded && self.end == loop_end {
                    let mut d_false = self.sub_to_end(j_addr);
                    d_false.run();
                    let x = d_false.suite.len();
                    if x > 1 {
                        for i in 0..x {
                            if d_false.suite.statements[i].simple_starts_with("return")
                                && (i + 1 < x || self.op(self.end_block) == Op::JumpAbsolute)
                            {
                                let tail = d_false.suite.statements.split_off(i + 1);
                                self.add_if(cond, d_true.suite, Some(d_false.suite));
                                self.suite.statements.extend(tail);
                                return Flow::End;
                            }
                        }
                    }
                    let last_return = d_false
                        .suite
                        .statements
                        .last()
                        .is_some_and(|s| s.simple_starts_with("return"));
                    if last_return && self.op(self.end_block) == Op::JumpAbsolute {
                        d_true.suite.add(Stmt::Simple("pass".to_owned()));
                        self.add_if(cond, d_true.suite, Some(d_false.suite));
                    } else {
                        d_true.suite.add(Stmt::Simple("continue".to_owned()));
                        self.add_if(cond, d_true.suite, None);
                        self.suite.statements.extend(d_false.suite.statements);
                    }
                    return Flow::End;
                }
                d_true.run();
                self.add_if(cond, d_true.suite, None);
                return Flow::Jump(j_addr);
            }
            d_true.run();
            let mut d_false = self.sub_to_end(j_addr);
            d_false.run();
            let x = d_false.suite.len();
            for i in 0..x {
                if d_false.suite.statements[i].simple_starts_with("return")
                    && (x == 1 || i + 1 < x || self.op(self.end_block) == Op::JumpAbsolute)
                {
                    let tail = d_false.suite.statements.split_off(i + 1);
                    self.add_if(cond, d_true.suite, Some(d_false.suite));
                    self.suite.statements.extend(tail);
                    return Flow::End;
                }
            }
            if let Some(i) = (0..x).find(|&i| d_false.suite.statements[i].is_simple_eq("continue"))
            {
                let tail = d_false.suite.statements.split_off(i);
                self.add_if(cond, d_true.suite, Some(d_false.suite));
                self.suite.statements.extend(tail);
                return Flow::End;
            }
            self.add_if(cond, d_true.suite, Some(d_false.suite));
            return Flow::End;
        }

        // general if/else split on the jump that closes the true branch
        let mut d_true = self.sub(next, end_true);
        let end_false = match self.op(end_true) {
            Op::JumpForward => self.jump(end_true),
            Op::JumpAbsolute => {
                if self.is_continue(end_true) {
                    // keep the closing jump in range so it renders as a
                    // trailing continue when it starts a line
                    d_true.end = end_true + 1;
                    d_true.bounded = true;
                    d_true.end_block = end_true;
                    self.bound_end()
                } else {
                    match self.jump(end_true) {
                        Some(ef) if ef > self.end_block => self.bound_end(),
                        Some(ef) if self.op_at(ef) == Some(Op::ReturnValue) => Some(ef + 1),
                        Some(ef) => Some(ef),
                        None => self.bound_end(),
                    }
                }
            }
            Op::ReturnValue => {
                let mut r = jump_addr;
                while r < self.len() && self.op(r) != Op::ReturnValue {
                    r += 1;
                }
                Some(r + 1)
            }
            _ => Some(jump_addr),
        };
        if jump_addr == addr + 2 && self.op(next) == Op::JumpForward {
            // empty body jumping straight to the else
        } else {
            d_true.run();
        }
        let mut d_false = self.sub_opt(jump_addr, end_false);
        if self.op(end_true) == Op::JumpForward && self.arg(end_true) == 0 {
            // empty else arm
        } else {
            d_false.run();
        }
        let have_exprs = !d_true.stack.borrow().is_empty() && !d_false.stack.borrow().is_empty();
        if have_exprs {
            let on_true = d_true.pop_expr();
            let on_false = d_false.pop_expr();
            self.push_expr(Expr::IfElse {
                cond: Box::new(cond),
                on_true: Box::new(on_true),
                on_false: Box::new(on_false),
            });
        } else {
            self.add_if(cond, d_true.suite, Some(d_false.suite));
        }
        match end_false {
            Some(e) => Flow::Jump(e),
            None => Flow::End,
        }
    }
}

// Block statements: loops, exception handling, context managers and the
// async variants.
impl Decompiler {
    fn op_for_iter(&mut self, addr: usize) -> Flow {
        if addr >= 1 && self.op(addr - 1) == Op::ReturnValue {
            return Flow::End;
        }
        let Some(jump_addr) = self.jump(addr) else {
            return Flow::Next;
        };
        let iterable = self.pop_expr();
        let end_body = if self.op_is(jump_addr, Op::PopBlock) {
            jump_addr
        } else {
            jump_addr.saturating_sub(1)
        };
        let for_rc = Rc::new(RefCell::new(ForStmt::new(iterable)));
        let tries = self.code.scratch.borrow().qcjumps.len() + 1;
        let mut body = Suite::default();
        for attempt in 0..tries {
            for_rc.borrow_mut().dest = None;
            let mut d_body = self.sub(addr + 1, end_body);
            d_body.stack.borrow_mut().push(Val::For(Rc::clone(&for_rc)));
            d_body.run();
            let ok = Self::verify_loop_tail(
                &self.code,
                d_body.end_block,
                &mut d_body.suite,
                addr + 1,
                end_body,
            );
            body = d_body.suite;
            if ok || attempt + 1 == tries {
                break;
            }
        }
        let mut end_addr = jump_addr;
        let mut else_body = None;
        if self.op_is(jump_addr, Op::PopBlock)
            && let Some(ls) = self.seek_back(addr, |o| o == Op::SetupLoop, None)
            && let Some(eol) = self.jump(ls)
        {
            let eol = if eol > self.end_block {
                self.bound_end()
            } else {
                Some(eol)
            };
            if let Some(eol) = eol
                && jump_addr + 1 < eol
            {
                let mut d_else = self.sub(jump_addr + 1, eol);
                d_else.run();
                if !d_else.suite.is_empty() {
                    else_body = Some(d_else.suite);
                }
                end_addr = eol;
            }
        }
        {
            let mut f = for_rc.borrow_mut();
            f.body = body;
            f.else_body = else_body;
        }
        self.suite.add(Stmt::For(for_rc));
        Flow::Jump(end_addr)
    }

    fn op_setup_loop(&mut self, addr: usize) -> Flow {
        let Some(span) = self.code.loops.iter().copied().find(|s| s.start == addr) else {
            return Flow::Next;
        };
        match span.kind {
            // FOR_ITER builds the statement itself
            LoopKind::For => Flow::Next,
            LoopKind::While { end_cond } => {
                let Some(end_cond_j) = self.jump(end_cond) else {
                    return Flow::Next;
                };
                let tries = self.code.scratch.borrow().qcjumps.len() + 1;
                let mut result: Option<IfStmt> = None;
                let mut fallback = Suite::default();
                for attempt in 0..tries {
                    let mut d_body = self.sub(addr + 1, end_cond_j);
                    d_body.run();
                    match d_body.suite.statements.pop() {
                        Some(Stmt::If(mut ifst)) => {
                            let ok = Self::verify_loop_tail(
                                &self.code,
                                d_body.end_block,
                                &mut ifst.true_suite,
                                end_cond,
                                end_cond_j,
                            );
                            if ok || attempt + 1 == tries {
                                result = Some(ifst);
                                break;
                            }
                        }
                        _ => {
                            Self::verify_loop_tail(
                                &self.code,
                                d_body.end_block,
                                &mut d_body.suite,
                                end_cond,
                                end_cond_j,
                            );
                            fallback = d_body.suite;
                            break;
                        }
                    }
                }
                let mut while_stmt = match result {
                    Some(ifst) => WhileStmt {
                        cond: ifst.cond,
                        body: ifst.true_suite,
                        else_body: None,
                    },
                    None => {
                        self.observer
                            .diagnostic("while condition is not an if statement");
                        self.write(DIAG_WHILE_COND);
                        WhileStmt {
                            cond: Expr::name(PLACEHOLDER),
                            body: fallback,
                            else_body: None,
                        }
                    }
                };
                if self.op_is(end_cond_j, Op::PopBlock) {
                    let mut d_else = self.sub(end_cond_j + 1, span.end);
                    d_else.run();
                    if !d_else.suite.is_empty() {
                        while_stmt.else_body = Some(d_else.suite);
                    }
                }
                self.suite.add(Stmt::While(while_stmt));
                Flow::Jump(span.end)
            }
            LoopKind::WhileTrue => {
                let end_addr = span.end.saturating_sub(1);
                let tries = self.code.scratch.borrow().qcjumps.len() + 1;
                let mut body = Suite::default();
                for attempt in 0..tries {
                    let mut d_body = self.sub(addr + 1, end_addr);
                    d_body.run();
                    let ok = Self::verify_loop_tail(
                        &self.code,
                        d_body.end_block,
                        &mut d_body.suite,
                        addr + 1,
                        end_addr,
                    );
                    body = d_body.suite;
                    if ok || attempt + 1 == tries {
                        break;
                    }
                }
                self.suite.add(Stmt::While(WhileStmt {
                    cond: Expr::Const(Const::Bool(true)),
                    body,
                    else_body: None,
                }));
                Flow::Jump(span.end)
            }
        }
    }

    fn op_setup_finally(&mut self, addr: usize) -> Flow {
        let Some(start_finally) = self.jump(addr) else {
            return Flow::Next;
        };
        let mut d_try = self.sub(addr + 1, start_finally);
        d_try.run();
        let mut d_finally = self.sub_unbounded(start_finally);
        d_finally.find_end_finally = true;
        let end_finally = d_finally.run();
        self.suite.add(Stmt::Finally {
            body: d_try.suite,
            finalizer: d_finally.suite,
        });
        if end_finally < self.len() && self.op(end_finally) == Op::EndFinally {
            Flow::Jump(end_finally + 1)
        } else {
            Flow::End
        }
    }

    fn op_setup_except(&mut self, addr: usize) -> Flow {
        let Some(end_try) = self.jump(addr) else {
            return Flow::Next;
        };
        let mut d_try = self.sub(addr + 1, end_try);
        d_try.run();
        let tryobj = Rc::new(RefCell::new(TryStmt {
            try_suite: d_try.suite,
            ..TryStmt::default()
        }));
        let mut fend = self.end_block;
        if end_try >= 1
            && self.op(end_try - 1) == Op::JumpForward
            && let Some(j) = self.jump(end_try - 1)
        {
            fend = j;
        }
        let mut start_except = end_try;
        let mut end_addr = addr;
        let mut j_except: Option<usize> = None;
        while start_except < self.len() && self.op(start_except) != Op::EndFinally {
            match self.op(start_except) {
                Op::DupTop => {
                    // typed clause; the exception-match compare fills it in
                    // and records where the next clause starts
                    let mut d = self.sub_unbounded(start_except + 1);
                    d.stack.borrow_mut().push(Val::Try(Rc::clone(&tryobj)));
                    d.run();
                    let Some(next_se) = tryobj.borrow_mut().next_start_except.take() else {
                        break;
                    };
                    start_except = next_se;
                    let candidate = start_except.saturating_sub(1);
                    if j_except.is_none()
                        || self.op_at(candidate) == Some(Op::JumpForward)
                        || j_except.is_some_and(|j| self.op_at(j) == Some(Op::ReturnValue))
                    {
                        j_except = Some(candidate);
                    }
                    end_addr = start_except + 1;
                }
                Op::PopTop => {
                    // bare clause: three POP_TOPs, the body, then POP_EXCEPT
                    start_except += 3;
                    let mut end_except = start_except;
                    let mut depth = 0u32;
                    let mut found = false;
                    while end_except < fend && end_except < self.len() {
                        match self.op(end_except) {
                            Op::SetupExcept => depth += 1,
                            Op::EndFinally if depth > 0 => depth -= 1,
                            Op::PopExcept if depth == 0 => {
                                found = true;
                                break;
                            }
                            _ => {}
                        }
                        end_except += 1;
                    }
                    if found {
                        let mut d_except = self.sub(start_except, end_except);
                        d_except.run();
                        tryobj.borrow_mut().add_clause(None, d_except.suite);
                        start_except = end_except + 2;
                        end_addr = start_except + 1;
                        if j_except.is_none()
                            || self.op_at(end_except + 1) == Some(Op::JumpForward)
                            || j_except.is_some_and(|j| self.op_at(j) == Some(Op::ReturnValue))
                        {
                            j_except = Some(end_except + 1);
                        }
                    } else if let Some(j) =
                        j_except.filter(|&j| self.op_at(j) == Some(Op::JumpForward))
                    {
                        if end_try >= 1 && self.op(end_try - 1) == Op::JumpForward {
                            let mut d_except = self.sub(start_except, fend);
                            d_except.run();
                            tryobj.borrow_mut().add_clause(None, d_except.suite);
                            let end = self.jump(j).unwrap_or(fend);
                            let mut d_else = self.sub(fend, end);
                            d_else.run();
                            tryobj.borrow_mut().else_suite = Some(d_else.suite);
                            self.suite.add(Stmt::Try(tryobj));
                            return Flow::Jump(end);
                        }
                        // the clause body returns, so there is no
                        // POP_EXCEPT; anything past the return is else
                        let end = self.jump(j).unwrap_or(fend);
                        let mut d_except = self.sub(start_except, end);
                        d_except.run();
                        let x = d_except.suite.len();
                        let split = d_except
                            .suite
                            .statements
                            .iter()
                            .position(|s| s.simple_starts_with("return"))
                            .map_or(0, |i| i + 1);
                        if split < x {
                            let tail = d_except.suite.statements.split_off(split);
                            tryobj.borrow_mut().else_suite = Some(Suite { statements: tail });
                        }
                        tryobj.borrow_mut().add_clause(None, d_except.suite);
                        self.suite.add(Stmt::Try(tryobj));
                        return Flow::Jump(end);
                    } else {
                        let bound = if fend == self.end_block {
                            self.bound_end()
                        } else {
                            Some(fend)
                        };
                        let mut d_except = self.sub_opt(start_except, bound);
                        d_except.scan_for_else = true;
                        let end_except = d_except.run();
                        tryobj.borrow_mut().add_clause(None, d_except.suite);
                        self.suite.add(Stmt::Try(tryobj));
                        return Flow::Jump(end_except + 1);
                    }
                }
                _ => break,
            }
        }
        self.suite.add(Stmt::Try(Rc::clone(&tryobj)));

        if let Some(j) = j_except
            && self.op_at(j + 1) == Some(Op::EndFinally)
        {
            let jop = self.op(j);
            let has_normal = jop == Op::JumpForward && self.jump(j) != Some(j + 2);
            let has_end_of_loop = jop == Op::JumpAbsolute && self.is_continue(j);
            let has_return = jop == Op::ReturnValue;
            let nb = self.end_block + 1;
            let has_nested_if = jop == Op::JumpAbsolute
                && nb < self.len()
                && self.jump(j).is_some_and(|t| t > nb)
                && self.op(nb) == Op::JumpForward;
            if has_normal || has_end_of_loop || has_return || has_nested_if {
                if has_return {
                    return Flow::Jump(end_addr);
                }
                let start_else = j + 2;
                let end_else = if has_normal {
                    self.jump(j)
                } else if has_end_of_loop {
                    if end_try >= 1 && self.is_continue(end_try - 1) {
                        return Flow::Jump(end_addr);
                    }
                    self.bound_end()
                } else {
                    Some(nb)
                };
                let mut d_else = self.sub_opt(start_else, end_else);
                d_else.run();
                tryobj.borrow_mut().else_suite = Some(d_else.suite);
                return match end_else {
                    Some(e) => Flow::Jump(e),
                    None => Flow::End,
                };
            }
        }
        Flow::Jump(end_addr)
    }

    fn op_setup_with(&mut self, addr: usize) -> Flow {
        let Some(end_with) = self.jump(addr) else {
            return Flow::Next;
        };
        let expr = self.pop_expr();
        let with_rc = Rc::new(RefCell::new(WithStmt {
            expr,
            name: None,
            suite: Suite::default(),
            is_async: false,
        }));
        let mut d_with = self.sub(addr + 1, end_with);
        d_with.stack.borrow_mut().push(Val::With(Rc::clone(&with_rc)));
        d_with.run();
        with_rc.borrow_mut().suite = d_with.suite;
        self.suite.add(Stmt::With(with_rc));
        // WITH_CLEANUP_START / WITH_CLEANUP_FINISH / END_FINALLY
        Flow::Jump(end_with + 3)
    }

    fn op_get_awaitable(&mut self, addr: usize) -> Flow {
        if let Some(Entry { val, tag }) = self.pop_entry() {
            let val = match val {
                Val::Expr(e) => Val::Expr(Expr::Awaited(Box::new(e))),
                other => other,
            };
            self.stack.borrow_mut().push_entry(Entry { val, tag });
        }
        match self.seek_fwd(addr, |o| o == Op::YieldFrom, None) {
            Some(y) => Flow::Jump(y + 1),
            None => Flow::Next,
        }
    }

    fn op_get_anext(&mut self, addr: usize) -> Flow {
        let iterable = self.pop_expr();
        let Some(j1) = (addr >= 1).then(|| self.jump(addr - 1)).flatten() else {
            return Flow::Next;
        };
        let for_rc = Rc::new(RefCell::new(ForStmt::new(iterable)));
        for_rc.borrow_mut().is_async = true;
        // the body sits between the anext protocol and the handler that
        // absorbs StopAsyncIteration, in two pieces
        let mut d_body = self.sub(addr + 3, j1.saturating_sub(1));
        d_body.stack.borrow_mut().push(Val::For(Rc::clone(&for_rc)));
        d_body.run();
        let Some(j2) = (j1 >= 1).then(|| self.jump(j1 - 1)).flatten() else {
            return Flow::Next;
        };
        let Some(tail_end) = (j2 >= 2).then(|| self.jump(j2 - 2)).flatten() else {
            return Flow::Next;
        };
        let new_end = tail_end.saturating_sub(1);
        d_body.start = j2;
        d_body.end = new_end;
        d_body.bounded = true;
        d_body.run();
        for_rc.borrow_mut().body = d_body.suite;
        self.suite.add(Stmt::For(for_rc));
        match self.seek_fwd(new_end, |o| o == Op::PopBlock, None) {
            Some(p) => Flow::Jump(p),
            None => Flow::Next,
        }
    }

    fn op_before_async_with(&mut self, addr: usize) -> Flow {
        let Some(with_addr) = self.seek_fwd(addr, |o| o == Op::SetupAsyncWith, None) else {
            return Flow::Next;
        };
        let Some(end_with) = self.jump(with_addr) else {
            return Flow::Next;
        };
        let expr = self.pop_expr();
        let with_rc = Rc::new(RefCell::new(WithStmt {
            expr,
            name: None,
            suite: Suite::default(),
            is_async: true,
        }));
        let mut d_with = self.sub(with_addr + 1, end_with);
        d_with.stack.borrow_mut().push(Val::With(Rc::clone(&with_rc)));
        d_with.run();
        with_rc.borrow_mut().suite = d_with.suite;
        self.suite.add(Stmt::With(with_rc));
        // async cleanup awaits the __aexit__ result before END_FINALLY
        Flow::Jump(end_with + 5)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::code::CodeObject;

    fn words(pairs: &[(Op, u8)]) -> Vec<u8> {
        pairs.iter().flat_map(|&(op, arg)| [op as u8, arg]).collect()
    }

    fn module(
        bytecode: Vec<u8>,
        consts: Vec<Const>,
        names: &[&str],
        lnotab: Vec<u8>,
    ) -> Rc<Code> {
        let obj = CodeObject {
            name: "<module>".to_owned(),
            first_line: 1,
            bytecode,
            consts,
            names: names.iter().map(|s| s.to_string()).collect(),
            lnotab,
            ..CodeObject::default()
        };
        Rc::new(Code::new(obj, None).expect("valid module"))
    }

    fn source(code: &Rc<Code>) -> String {
        module_suite(code).to_source(4)
    }

    #[test]
    fn assignment_and_implicit_return() {
        let code = module(
            words(&[
                (Op::LoadConst, 0),
                (Op::StoreName, 0),
                (Op::LoadConst, 1),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::Int(1), Const::None],
            &["x"],
            vec![],
        );
        assert_eq!(source(&code), "x = 1\n");
    }

    #[test]
    fn if_with_else_branch() {
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::PopJumpIfFalse, 10),
                (Op::LoadConst, 0),
                (Op::StoreName, 1),
                (Op::JumpForward, 4),
                (Op::LoadConst, 1),
                (Op::StoreName, 1),
                (Op::LoadConst, 2),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::Int(1), Const::Int(2), Const::None],
            &["x", "y"],
            vec![4, 1, 6, 2],
        );
        assert_eq!(source(&code), "if x:\n    y = 1\nelse:\n    y = 2\n");
    }

    #[test]
    fn while_loop_with_condition() {
        let code = module(
            words(&[
                (Op::SetupLoop, 12),
                (Op::LoadName, 0),
                (Op::PopJumpIfFalse, 12),
                (Op::LoadConst, 0),
                (Op::StoreName, 1),
                (Op::JumpAbsolute, 2),
                (Op::PopBlock, 0),
                (Op::LoadConst, 1),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::Int(1), Const::None],
            &["x", "y"],
            vec![6, 1],
        );
        assert_eq!(source(&code), "while x:\n    y = 1\n");
    }

    #[test]
    fn for_loop_over_name() {
        let code = module(
            words(&[
                (Op::SetupLoop, 20),
                (Op::LoadName, 0),
                (Op::GetIter, 0),
                (Op::ForIter, 12),
                (Op::StoreName, 1),
                (Op::LoadName, 2),
                (Op::LoadName, 1),
                (Op::CallFunction, 1),
                (Op::PopTop, 0),
                (Op::JumpAbsolute, 6),
                (Op::PopBlock, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["s", "i", "g"],
            vec![10, 1],
        );
        assert_eq!(source(&code), "for i in s:\n    g(i)\n");
    }

    #[test]
    fn boolean_and_folds_or_pop_jump() {
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::JumpIfFalseOrPop, 6),
                (Op::LoadName, 1),
                (Op::StoreName, 2),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["a", "b", "r"],
            vec![],
        );
        assert_eq!(source(&code), "r = a and b\n");
    }

    #[test]
    fn chained_comparison_recovers_links() {
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::LoadName, 1),
                (Op::DupTop, 0),
                (Op::RotThree, 0),
                (Op::CompareOp, 0),
                (Op::JumpIfFalseOrPop, 18),
                (Op::LoadName, 2),
                (Op::CompareOp, 0),
                (Op::JumpForward, 4),
                (Op::RotTwo, 0),
                (Op::PopTop, 0),
                (Op::StoreName, 3),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["a", "b", "c", "r"],
            vec![],
        );
        assert_eq!(source(&code), "r = a < b < c\n");
    }

    #[test]
    fn conditional_expression() {
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::PopJumpIfFalse, 8),
                (Op::LoadName, 1),
                (Op::JumpForward, 2),
                (Op::LoadName, 2),
                (Op::StoreName, 3),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["c", "a", "b", "r"],
            vec![],
        );
        assert_eq!(source(&code), "r = a if c else b\n");
    }

    #[test]
    fn try_with_typed_except_clause() {
        let code = module(
            words(&[
                (Op::SetupExcept, 10),
                (Op::LoadName, 0),
                (Op::CallFunction, 0),
                (Op::StoreName, 1),
                (Op::PopBlock, 0),
                (Op::JumpForward, 24),
                (Op::DupTop, 0),
                (Op::LoadName, 2),
                (Op::CompareOp, 10),
                (Op::PopJumpIfFalse, 34),
                (Op::PopTop, 0),
                (Op::PopTop, 0),
                (Op::PopTop, 0),
                (Op::LoadConst, 0),
                (Op::StoreName, 3),
                (Op::PopExcept, 0),
                (Op::JumpForward, 2),
                (Op::EndFinally, 0),
                (Op::LoadConst, 1),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::Int(1), Const::None],
            &["f", "x", "ValueError", "y"],
            vec![2, 1, 10, 1, 14, 1],
        );
        assert_eq!(
            source(&code),
            "try:\n    x = f()\nexcept ValueError:\n    y = 1\n"
        );
    }

    #[test]
    fn with_statement_binds_manager() {
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::LoadName, 1),
                (Op::CallFunction, 1),
                (Op::SetupWith, 14),
                (Op::StoreName, 2),
                (Op::LoadName, 3),
                (Op::LoadName, 2),
                (Op::CallFunction, 1),
                (Op::PopTop, 0),
                (Op::PopBlock, 0),
                (Op::LoadConst, 0),
                (Op::WithCleanupStart, 0),
                (Op::WithCleanupFinish, 0),
                (Op::EndFinally, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["open", "p", "f", "g"],
            vec![10, 1],
        );
        assert_eq!(source(&code), "with open(p) as f:\n    g(f)\n");
    }

    #[test]
    fn def_statement_from_make_function() {
        let child = CodeObject {
            name: "add".to_owned(),
            flags: 0x43,
            arg_count: 2,
            first_line: 1,
            bytecode: words(&[
                (Op::LoadFast, 0),
                (Op::LoadFast, 1),
                (Op::BinaryAdd, 0),
                (Op::ReturnValue, 0),
            ]),
            consts: vec![Const::None],
            varnames: vec!["a".to_owned(), "b".to_owned()],
            lnotab: vec![0, 1],
            ..CodeObject::default()
        };
        let code = module(
            words(&[
                (Op::LoadConst, 0),
                (Op::LoadConst, 1),
                (Op::MakeFunction, 0),
                (Op::StoreName, 0),
                (Op::LoadConst, 2),
                (Op::ReturnValue, 0),
            ]),
            vec![
                Const::Code(Box::new(child)),
                Const::Str("add".to_owned()),
                Const::None,
            ],
            &["add"],
            vec![],
        );
        assert_eq!(
            source(&code).trim(),
            "def add(a, b):\n    return a + b"
        );
    }

    #[test]
    fn list_comprehension_rebuilds_pipeline() {
        let child = CodeObject {
            name: "<listcomp>".to_owned(),
            flags: 0x13,
            arg_count: 1,
            first_line: 1,
            bytecode: words(&[
                (Op::BuildList, 0),
                (Op::LoadFast, 0),
                (Op::ForIter, 8),
                (Op::StoreFast, 1),
                (Op::LoadFast, 1),
                (Op::ListAppend, 2),
                (Op::JumpAbsolute, 4),
                (Op::ReturnValue, 0),
            ]),
            varnames: vec![".0".to_owned(), "x".to_owned()],
            ..CodeObject::default()
        };
        let code = module(
            words(&[
                (Op::LoadConst, 0),
                (Op::LoadConst, 1),
                (Op::MakeFunction, 0),
                (Op::LoadName, 0),
                (Op::GetIter, 0),
                (Op::CallFunction, 1),
                (Op::StoreName, 1),
                (Op::LoadConst, 2),
                (Op::ReturnValue, 0),
            ]),
            vec![
                Const::Code(Box::new(child)),
                Const::Str("<listcomp>".to_owned()),
                Const::None,
            ],
            &["s", "r"],
            vec![],
        );
        assert_eq!(source(&code), "r = [x for x in s]\n");
    }

    #[test]
    fn rot_two_becomes_tuple_swap() {
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::LoadName, 1),
                (Op::RotTwo, 0),
                (Op::StoreName, 1),
                (Op::StoreName, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["b", "a"],
            vec![],
        );
        assert_eq!(source(&code), "a, b = b, a\n");
    }

    #[test]
    fn augmented_assignment() {
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::LoadConst, 0),
                (Op::InplaceAdd, 0),
                (Op::StoreName, 0),
                (Op::LoadConst, 1),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::Int(1), Const::None],
            &["x"],
            vec![],
        );
        assert_eq!(source(&code), "x += 1\n");
    }

    #[test]
    fn plain_import() {
        let code = module(
            words(&[
                (Op::LoadConst, 0),
                (Op::LoadConst, 1),
                (Op::ImportName, 0),
                (Op::StoreName, 0),
                (Op::LoadConst, 1),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::Int(0), Const::None],
            &["os"],
            vec![],
        );
        assert_eq!(source(&code), "import os\n");
    }

    #[test]
    fn from_import_with_alias() {
        let code = module(
            words(&[
                (Op::LoadConst, 0),
                (Op::LoadConst, 1),
                (Op::ImportName, 0),
                (Op::ImportFrom, 1),
                (Op::StoreName, 2),
                (Op::PopTop, 0),
                (Op::LoadConst, 2),
                (Op::ReturnValue, 0),
            ]),
            vec![
                Const::Int(0),
                Const::Tuple(vec![Const::Str("path".to_owned())]),
                Const::None,
            ],
            &["os", "path", "p"],
            vec![],
        );
        assert_eq!(source(&code), "from os import path as p\n");
    }

    #[test]
    fn try_except_binding_with_else_and_finally() {
        // try:
        //     x = f()
        // except TypeError as e:
        //     y = e
        // else:
        //     z = 1
        // finally:
        //     w = 2
        let code = module(
            words(&[
                (Op::SetupFinally, 58),
                (Op::SetupExcept, 10),
                (Op::LoadName, 0),
                (Op::CallFunction, 0),
                (Op::StoreName, 1),
                (Op::PopBlock, 0),
                (Op::JumpForward, 38),
                (Op::DupTop, 0),
                (Op::LoadName, 2),
                (Op::CompareOp, 10),
                (Op::PopJumpIfFalse, 50),
                (Op::PopTop, 0),
                (Op::StoreName, 3),
                (Op::PopTop, 0),
                (Op::SetupFinally, 10),
                (Op::LoadName, 3),
                (Op::StoreName, 4),
                (Op::PopBlock, 0),
                (Op::PopExcept, 0),
                (Op::LoadConst, 0),
                (Op::LoadConst, 0),
                (Op::StoreName, 3),
                (Op::DeleteName, 3),
                (Op::EndFinally, 0),
                (Op::JumpForward, 6),
                (Op::EndFinally, 0),
                (Op::LoadConst, 1),
                (Op::StoreName, 5),
                (Op::PopBlock, 0),
                (Op::LoadConst, 0),
                (Op::LoadConst, 2),
                (Op::StoreName, 6),
                (Op::EndFinally, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None, Const::Int(1), Const::Int(2)],
            &["f", "x", "TypeError", "e", "y", "z", "w"],
            vec![4, 1, 10, 1, 16, 1, 22, 1, 8, 1],
        );
        assert_eq!(
            source(&code),
            "try:\n    x = f()\nexcept TypeError as e:\n    y = e\nelse:\n    z = 1\nfinally:\n    w = 2\n"
        );
    }

    #[test]
    fn for_loop_unpacks_tuple_and_folds_or_condition() {
        // def pick(x, y):
        //     for i, j in zip(x, y):
        //         if i or j:
        //             g = i, j
        //     return g
        let child = CodeObject {
            name: "pick".to_owned(),
            flags: 0x43,
            arg_count: 2,
            first_line: 1,
            bytecode: words(&[
                (Op::SetupLoop, 38),
                (Op::LoadGlobal, 0),
                (Op::LoadFast, 0),
                (Op::LoadFast, 1),
                (Op::CallFunction, 2),
                (Op::GetIter, 0),
                (Op::ForIter, 24),
                (Op::UnpackSequence, 2),
                (Op::StoreFast, 2),
                (Op::StoreFast, 3),
                (Op::LoadFast, 2),
                (Op::PopJumpIfTrue, 28),
                (Op::LoadFast, 3),
                (Op::PopJumpIfFalse, 12),
                (Op::LoadFast, 2),
                (Op::LoadFast, 3),
                (Op::BuildTuple, 2),
                (Op::StoreFast, 4),
                (Op::JumpAbsolute, 12),
                (Op::PopBlock, 0),
                (Op::LoadFast, 4),
                (Op::ReturnValue, 0),
            ]),
            consts: vec![Const::None],
            names: vec!["zip".to_owned()],
            varnames: vec![
                "x".to_owned(),
                "y".to_owned(),
                "i".to_owned(),
                "j".to_owned(),
                "g".to_owned(),
            ],
            lnotab: vec![0, 1, 20, 1, 8, 1, 12, 1],
            ..CodeObject::default()
        };
        let code = module(
            words(&[
                (Op::LoadConst, 0),
                (Op::LoadConst, 1),
                (Op::MakeFunction, 0),
                (Op::StoreName, 0),
                (Op::LoadConst, 2),
                (Op::ReturnValue, 0),
            ]),
            vec![
                Const::Code(Box::new(child)),
                Const::Str("pick".to_owned()),
                Const::None,
            ],
            &["pick"],
            vec![],
        );
        assert_eq!(
            source(&code).trim(),
            "def pick(x, y):\n    for i, j in zip(x, y):\n        if i or j:\n            g = i, j\n    return g"
        );
    }

    #[test]
    fn nested_with_blocks_share_one_header() {
        // with a() as x, b() as y:
        //     g(x)
        let code = module(
            words(&[
                (Op::LoadName, 0),
                (Op::CallFunction, 0),
                (Op::SetupWith, 32),
                (Op::StoreName, 1),
                (Op::LoadName, 2),
                (Op::CallFunction, 0),
                (Op::SetupWith, 14),
                (Op::StoreName, 3),
                (Op::LoadName, 4),
                (Op::LoadName, 1),
                (Op::CallFunction, 1),
                (Op::PopTop, 0),
                (Op::PopBlock, 0),
                (Op::LoadConst, 0),
                (Op::WithCleanupStart, 0),
                (Op::WithCleanupFinish, 0),
                (Op::EndFinally, 0),
                (Op::PopBlock, 0),
                (Op::LoadConst, 0),
                (Op::WithCleanupStart, 0),
                (Op::WithCleanupFinish, 0),
                (Op::EndFinally, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["a", "x", "b", "y", "g"],
            vec![16, 1],
        );
        assert_eq!(source(&code), "with a() as x, b() as y:\n    g(x)\n");
    }

    #[test]
    fn trailing_continue_in_loop_renders_as_pass() {
        // the loop-closing jump carries the line of an explicit trailing
        // continue, which is redundant at the end of a loop body
        let code = module(
            words(&[
                (Op::SetupLoop, 12),
                (Op::LoadName, 0),
                (Op::PopJumpIfFalse, 14),
                (Op::LoadName, 1),
                (Op::CallFunction, 0),
                (Op::PopTop, 0),
                (Op::JumpAbsolute, 2),
                (Op::PopBlock, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::None],
            &["x", "f"],
            vec![6, 1, 6, 1],
        );
        assert_eq!(source(&code), "while x:\n    f()\n    pass\n");
    }

    #[test]
    fn module_docstring_is_promoted() {
        let code = module(
            words(&[
                (Op::LoadConst, 0),
                (Op::StoreName, 0),
                (Op::LoadConst, 1),
                (Op::ReturnValue, 0),
            ]),
            vec![Const::Str("Module docs.".to_owned()), Const::None],
            &["__doc__"],
            vec![],
        );
        assert_eq!(source(&code), "'Module docs.'\n");
    }
}
