//! Pre-execution analysis of a code unit: loop spans, else-jump
//! detection and the classification of every conditional branch into
//! statement, ternary, chained-comparison or boolean-operator jumps.

use std::collections::{HashMap, HashSet};

use crate::code::{ChainPos, Code, LoopKind, LoopSpan};
use crate::instr::Op;

pub(crate) fn annotate(code: &mut Code) {
    code.else_jumps = find_else(code);
    let mut analyzer = Analyzer {
        code,
        statement_jumps: Vec::new(),
        qcjumps: Vec::new(),
        ternary_jumps: HashSet::new(),
        chain_jumps: HashMap::new(),
        loops: Vec::new(),
    };
    analyzer.find_jumps();
    let Analyzer {
        statement_jumps,
        qcjumps,
        ternary_jumps,
        chain_jumps,
        loops,
        ..
    } = analyzer;
    code.loops = loops;
    code.ternary_jumps = ternary_jumps;
    code.chain_jumps = chain_jumps;
    code.implicit_continuation = implicit_continuation_lines(code);
    let mut scratch = code.scratch.borrow_mut();
    scratch.statement_jumps = statement_jumps;
    scratch.qcjumps = qcjumps;
}

/// A conditional branch that lands right after an unconditional exit
/// jumps over an else clause. Unconditional jumps that forward to such
/// a landing site inherit the classification.
fn find_else(code: &Code) -> HashSet<usize> {
    let mut jumps: HashMap<usize, usize> = HashMap::new();
    for i in 0..code.instrs.len() {
        let op = code.op(i);
        if op.is_pop_jump() {
            if let Some(j) = code.jump_index(i) {
                let lands_after_exit = j > 0 && code.op(j - 1).is_else_jump_source();
                if lands_after_exit || code.op(j) == Op::ForIter {
                    jumps.insert(j, i);
                }
            }
        } else if matches!(op, Op::JumpAbsolute | Op::JumpForward) {
            if let Some(j) = code.jump_index(i) {
                if let Some(&v) = jumps.get(&j) {
                    jumps.insert(i, v);
                }
            }
        }
    }
    jumps.into_values().collect()
}

/// Literal builds whose elements span several source lines are noted so
/// the renderer can re-wrap them. Only module-level stores are tracked;
/// small literals stay on one line.
fn implicit_continuation_lines(code: &Code) -> HashMap<usize, u32> {
    let mut mapping = HashMap::new();
    for i in 1..code.instrs.len() {
        if !matches!(code.op(i), Op::StoreGlobal | Op::StoreName) {
            continue;
        }
        let build = i - 1;
        if code.arg(build) <= 4
            || !matches!(
                code.op(build),
                Op::BuildTuple | Op::BuildList | Op::BuildSet | Op::BuildMap | Op::BuildConstKeyMap
            )
        {
            continue;
        }
        let mut num_lines = 0u32;
        let mut cur = build.checked_sub(1);
        while let Some(k) = cur {
            if code.is_statement_at(k) {
                break;
            }
            if code.starts_line_at(k) {
                num_lines += 1;
            }
            cur = k.checked_sub(1);
        }
        if num_lines > 1 {
            mapping.insert(build, num_lines);
        }
    }
    mapping
}

struct Analyzer<'a> {
    code: &'a Code,
    statement_jumps: Vec<usize>,
    qcjumps: Vec<usize>,
    ternary_jumps: HashSet<usize>,
    chain_jumps: HashMap<usize, ChainPos>,
    loops: Vec<LoopSpan>,
}

impl Analyzer<'_> {
    fn len(&self) -> usize {
        self.code.instrs.len()
    }

    fn op_at(&self, i: usize) -> Option<Op> {
        self.code.instrs.get(i).map(|ins| ins.op)
    }

    fn arg_at(&self, i: usize) -> Option<u32> {
        self.code.instrs.get(i).map(|ins| ins.arg)
    }

    /// Byte offset of an instruction index, with the end of the
    /// bytecode standing in for one-past-the-end indices.
    fn off(&self, i: usize) -> u32 {
        self.code
            .instrs
            .get(i)
            .map_or(self.code.obj.bytecode.len() as u32, |ins| ins.offset)
    }

    fn jump(&self, i: usize) -> Option<usize> {
        self.code.jump_index(i)
    }

    fn is_pop_jump(&self, i: usize) -> bool {
        self.op_at(i).is_some_and(Op::is_pop_jump)
    }

    fn starts_line(&self, i: usize) -> bool {
        i < self.len() && self.code.starts_line_at(i)
    }

    fn is_continue(&self, i: usize) -> bool {
        i < self.len() && self.code.is_continue_jump_at(i)
    }

    fn seek_stmt(&self, mut i: usize) -> Option<usize> {
        while i < self.len() {
            if self.code.is_statement_at(i) {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    fn find_jumps(&mut self) {
        let mut i = 0;
        while i < self.len() {
            let op = self.code.op(i);
            if let Some(target) = self.jump(i) {
                if op == Op::SetupLoop {
                    i = self.classify_loop(i, target).max(i);
                } else if op.is_pop_jump() {
                    i = self.classify_branch(i, target).max(i);
                }
            }
            i += 1;
        }
    }

    /// Splits a `SETUP_LOOP` block into a for loop, a `while True`, or a
    /// conditional while whose condition ends at `end_cond`.
    fn classify_loop(&mut self, start: usize, target: usize) -> usize {
        let Some(mut end_addr) = target.checked_sub(1) else {
            return start;
        };
        let mut end = target;

        // A branch before the loop that lands inside it means the loop
        // sits in the true suite of an if; follow it to the real end.
        let mut cur = 0;
        while cur < start {
            if self.is_pop_jump(cur) {
                let arg = self.code.arg(cur);
                if self.off(start) < arg && arg < self.off(end_addr) {
                    if let Some(j) = self.jump(cur) {
                        if let Some(nj) = j.checked_sub(1) {
                            end = nj;
                            if let Some(ne) = nj.checked_sub(1) {
                                end_addr = ne;
                            }
                        }
                    }
                    break;
                }
            }
            cur += 1;
        }

        // Iterator setup before the first statement marks a for loop.
        // MAKE_FUNCTION / GET_ITER pairs belong to a genexpr argument,
        // not to the loop itself.
        let mut cur = start + 1;
        let mut genexpr_depth = 0u32;
        let mut is_for = false;
        while let Some(op) = self.op_at(cur) {
            if cur >= end_addr || op.is_stmt() {
                break;
            }
            if genexpr_depth > 0 && op == Op::GetIter {
                genexpr_depth -= 1;
            } else if op.is_for_jump() {
                is_for = true;
                break;
            } else if op == Op::JumpAbsolute {
                if let Some(j) = self.jump(cur) {
                    if self.op_at(j).is_some_and(Op::is_for_jump) {
                        is_for = true;
                    }
                }
                break;
            } else if op == Op::MakeFunction {
                genexpr_depth += 1;
            }
            cur += 1;
        }

        let mut next_i = start;
        let kind = if is_for {
            LoopKind::For
        } else {
            let mut end_cond = 0usize;
            let mut cur = start + 1;
            while cur < end_addr {
                let op = self.code.op(cur);
                if op.is_stmt() {
                    break;
                }
                if op.is_pop_jump() {
                    if let Some(j) = self.jump(cur) {
                        if self.op_at(j) == Some(Op::PopBlock) || j == end_addr {
                            end_cond = cur;
                        }
                    }
                }
                cur += 1;
            }
            if end_cond > 0 {
                next_i = end_cond;
                self.statement_jumps.push(end_cond);
                let mut cur = start + 1;
                while cur < end_cond {
                    if self.is_pop_jump(cur) {
                        cur = self.proc_chained(cur);
                        if let Some(j) = self.jump(cur) {
                            if j > 0 && self.code.op(j - 1) == Op::JumpForward {
                                // conditional expression inside the loop
                                // condition, unless a same-target branch
                                // sits between here and the join
                                if self.no_same_target_between(cur, j, self.code.arg(cur)) {
                                    self.ternary_jumps.insert(cur);
                                }
                            }
                        }
                    }
                    cur += 1;
                }
                LoopKind::While { end_cond }
            } else {
                LoopKind::WhileTrue
            }
        };
        if self.op_at(end_addr) == Some(Op::PopBlock) {
            end = end_addr;
        }
        self.loops.push(LoopSpan { start, end, kind });
        next_i
    }

    fn classify_branch(&mut self, addr: usize, target: usize) -> usize {
        if target == addr + 1 {
            self.statement_jumps.push(addr);
            return addr;
        }
        let Some(next_stmt) = self.seek_stmt(addr) else {
            return addr;
        };
        let mut lastjump = None;
        if self.code.name() != "<lambda>" {
            lastjump = self.find_start_of_true_suite(addr, next_stmt);
            if matches!(
                self.code.name(),
                "<listcomp>" | "<setcomp>" | "<dictcomp>" | "<genexpr>"
            ) {
                if let Some(lj) = lastjump {
                    self.statement_jumps.push(lj);
                }
                lastjump = None;
            }
        }
        match lastjump {
            Some(lj) => self.scan_condition_region(addr, lj, next_stmt),
            None => self.scan_simple_region(addr, next_stmt),
        }
    }

    /// Finds the last branch of the condition that opens the statement
    /// at `addr`: the branch whose target leaves the region between the
    /// statement start and the next statement opcode.
    fn find_start_of_true_suite(&self, addr: usize, next_stmt: usize) -> Option<usize> {
        let addr_off = self.off(addr);
        let next_off = self.off(next_stmt);
        let mut cur = addr;
        let mut last_jump: Option<usize> = None;
        let mut backward: Option<usize> = None;
        while cur < next_stmt {
            if self.code.op(cur).is_pop_jump() {
                let arg = self.code.arg(cur);
                let pass_shape = self.jump(cur) == Some(cur + 2)
                    && self.op_at(cur + 1) == Some(Op::JumpForward)
                    && self.jump(cur + 1).is_some_and(|j| j > next_stmt);
                if arg > next_off || arg < addr_off || pass_shape {
                    match last_jump {
                        None => {
                            last_jump = Some(cur);
                            if arg < addr_off && self.is_continue(next_stmt) {
                                // a jump back to the loop head may still
                                // open the true suite
                                backward = Some(cur);
                            }
                        }
                        Some(lj) if self.code.arg(lj) == arg => last_jump = Some(cur),
                        Some(lj) => {
                            let Some(b) = backward else {
                                break;
                            };
                            if self.code.arg(b) != self.code.arg(lj) {
                                break;
                            }
                            let Some(c) = self.jump(cur) else {
                                break;
                            };
                            let stale = self
                                .statement_jumps
                                .last()
                                .is_some_and(|&s| arg >= self.off(s))
                                || self.loops.last().is_some_and(|lp| c >= lp.end);
                            if stale {
                                break;
                            }
                            let loop_head_else = self.code.op(c) == Op::JumpAbsolute
                                && self.is_continue(c)
                                && self.starts_line(c)
                                && c >= 2
                                && self.code.op(c - 1) == Op::JumpForward
                                && self.code.op(c - 2) != Op::PopTop;
                            if loop_head_else {
                                break;
                            }
                            last_jump = Some(cur);
                        }
                    }
                }
            }
            cur += 1;
        }
        last_jump
    }

    /// First instruction of the true suite opened by the branch at
    /// `addr`, skipping the `JUMP_FORWARD` / `ROT_TWO POP_TOP` shims a
    /// folded chained comparison leaves behind.
    fn pj_start_true(&self, mut addr: usize) -> usize {
        let mut next = addr + 1;
        if self.op_at(next) == Some(Op::JumpForward) {
            if self.starts_line(next) {
                return next;
            }
            if self.arg_at(next) == Some(0) {
                addr = next;
                next += 1;
            }
        }
        if addr + 4 < self.len()
            && self.op_at(addr + 2) == Some(Op::PopTop)
            && matches!(self.op_at(next), Some(Op::JumpAbsolute | Op::JumpForward))
        {
            if self.code.op(addr) == Op::PopJumpIfFalse {
                return addr + 4;
            }
            return addr + 3;
        }
        next
    }

    /// Follows a `DUP_TOP ROT_THREE COMPARE_OP` prefix through the rest
    /// of its chained comparison, marking start, inner and end branches.
    /// Returns the last branch of the chain.
    fn proc_chained(&mut self, mut addr: usize) -> usize {
        if addr < 3
            || self.code.op(addr - 1) != Op::CompareOp
            || self.code.op(addr - 2) != Op::RotThree
            || self.code.op(addr - 3) != Op::DupTop
        {
            return addr;
        }
        self.chain_jumps.insert(addr, ChainPos::Start);
        let mut cur = addr + 1;
        while cur < self.len() {
            if self.code.op(cur).is_pop_jump() {
                if cur >= 3
                    && self.code.op(cur - 3) == Op::DupTop
                    && self.code.op(cur - 2) == Op::RotThree
                {
                    if self.code.arg(cur) == self.code.arg(addr) {
                        self.chain_jumps.insert(cur, ChainPos::Inner);
                        addr = cur;
                    }
                } else if self.jump(addr) == Some(cur + 2) {
                    self.chain_jumps.insert(cur, ChainPos::End);
                    return cur;
                } else {
                    cur = self.proc_chained(cur);
                    if let Some(j) = self.jump(cur) {
                        if j > 0 && self.code.op(j - 1) == Op::JumpForward {
                            self.ternary_jumps.insert(cur);
                        }
                    }
                }
            }
            cur += 1;
        }
        addr
    }

    fn no_same_target_between(&self, from: usize, end: usize, arg: u32) -> bool {
        let mut probe = from + 1;
        while probe < end {
            if self.code.op(probe).is_pop_jump() && self.code.arg(probe) == arg {
                return false;
            }
            probe += 1;
        }
        true
    }

    /// Step to the next conditional branch before `end`.
    fn advance(&self, mut cur: usize, end: usize) -> usize {
        cur += 1;
        while cur < end && !self.code.op(cur).is_pop_jump() {
            cur += 1;
        }
        cur
    }

    /// Classifies branches between a statement-opening branch and the
    /// first instruction of its true suite.
    fn scan_condition_region(&mut self, addr: usize, lastjump: usize, next_stmt: usize) -> usize {
        let mut qcjumps: Vec<usize> = Vec::new();
        let start_true = self.pj_start_true(lastjump);
        let start_true_off = self.off(start_true);
        let mut cur = addr;
        let mut done_to = addr;
        while cur < start_true {
            cur = self.proc_chained(cur);
            let Some(x) = self.jump(cur).and_then(|j| j.checked_sub(1)) else {
                cur = self.advance(cur, start_true);
                continue;
            };
            let arg = self.code.arg(cur);
            let off = self.off(cur);
            if off < arg
                && arg <= self.off(next_stmt)
                && self.code.op(x) == Op::JumpForward
                && x >= 1
                && self.code.op(x - 1) != Op::PopTop
            {
                if self.no_same_target_between(cur, x, arg) {
                    let joins_later = self.jump(x).is_some_and(|j| j > next_stmt);
                    if joins_later || self.starts_line(x) {
                        // `if a: pass` followed by an else clause
                        self.statement_jumps.push(cur);
                    } else {
                        self.ternary_jumps.insert(cur);
                        if x > done_to {
                            if let Some(d) = self.jump(x).and_then(|j| j.checked_sub(2)) {
                                done_to = d;
                            }
                        }
                    }
                }
            } else if arg == start_true_off {
                // `or` operand jumping straight to the true suite
                done_to = lastjump;
            } else if off < arg && arg < start_true_off {
                if x > done_to {
                    done_to = x;
                }
            } else if done_to <= cur {
                if self.starts_line(self.pj_start_true(cur)) {
                    if !self.statement_jumps.contains(&cur) {
                        let mut opens_statement = true;
                        if self.is_continue(cur) {
                            // `if a:` wrapping `if b or c:` where both
                            // share the loop-head target
                            if cur != lastjump
                                && arg != self.code.arg(lastjump)
                                && self.op_at(start_true) == Some(Op::JumpAbsolute)
                                && self.arg_at(start_true) == Some(arg)
                            {
                                let mut widened = false;
                                let mut probe = cur + 1;
                                while probe < lastjump {
                                    if self.is_pop_jump(probe)
                                        && self.code.arg(probe) > self.code.arg(lastjump)
                                    {
                                        widened = true;
                                        break;
                                    }
                                    probe += 1;
                                }
                                if !widened {
                                    done_to = lastjump;
                                    opens_statement = false;
                                    qcjumps.push(cur);
                                }
                            }
                        } else if self.code.op(x) == Op::JumpForward
                            || (self.code.op(x) == Op::JumpAbsolute && self.code.arg(x) > arg)
                        {
                            let mut probe = cur + 1;
                            while probe <= lastjump {
                                if self.is_pop_jump(probe) && self.code.arg(probe) == arg {
                                    // `if a and b:` with an else clause
                                    opens_statement = false;
                                    break;
                                }
                                probe += 1;
                            }
                        }
                        if opens_statement {
                            self.statement_jumps.push(cur);
                        }
                    }
                } else if cur == lastjump && self.op_at(next_stmt) == Some(Op::ReturnValue) {
                    // return (a if b else c)
                    self.ternary_jumps.insert(cur);
                }
                if self.statement_jumps.contains(&cur) && !qcjumps.is_empty() {
                    if cur == lastjump {
                        self.maybe_promote_qcjumps(&mut qcjumps, x, next_stmt);
                    }
                    self.qcjumps.append(&mut qcjumps);
                }
            }
            cur = self.advance(cur, start_true);
        }
        start_true.saturating_sub(1)
    }

    /// A questionable continue jump is kept as a boolean operand unless
    /// the return count of the suite it would open says otherwise.
    fn maybe_promote_qcjumps(&mut self, qcjumps: &mut Vec<usize>, x: usize, next_stmt: usize) {
        if self.statement_jumps.len() >= 2 {
            let prev = self.statement_jumps[self.statement_jumps.len() - 2];
            if self.is_continue(prev) {
                return;
            }
        }
        let Some(lp) = self.loops.last() else {
            return;
        };
        let mut enda = lp.end;
        if self.statement_jumps.len() > 1 {
            let prev = self.statement_jumps[self.statement_jumps.len() - 2];
            if prev > enda {
                if let Some(j) = self.jump(prev) {
                    enda = j;
                }
            }
        }
        let mut seeded: i32 = 0;
        let mut start: Option<usize> = None;
        let x_op = self.code.op(x);
        if x_op != Op::JumpAbsolute || self.code.arg(x) < self.off(enda) {
            if x_op == Op::JumpAbsolute && x != next_stmt {
                if self.code.arg(x) < self.off(x) {
                    start = Some(x + 1);
                    seeded = 2;
                } else {
                    start = self.jump(x);
                    seeded = 1;
                }
            } else if x_op == Op::JumpForward {
                start = self.jump(x);
                seeded = 1;
            } else if x_op == Op::ReturnValue {
                start = Some(x + 1);
                seeded = 2;
            } else {
                start = Some(x + 1);
                seeded = 1;
            }
        }
        let Some(start) = start else {
            return;
        };
        let mut count = self.count_returns(start, enda) - seeded;
        while count > 0 {
            let Some(q) = qcjumps.pop() else {
                break;
            };
            self.statement_jumps.push(q);
            count -= 1;
        }
    }

    fn count_returns(&self, mut cur: usize, end: usize) -> i32 {
        let mut count = 0;
        while cur <= end && cur < self.len() {
            let op = self.code.op(cur);
            if op != Op::JumpAbsolute {
                if let Some(j) = self.jump(cur) {
                    if j < cur {
                        count -= 1;
                    } else {
                        cur = j;
                    }
                } else if op == Op::ReturnValue {
                    count += 1;
                }
            }
            cur += 1;
        }
        count
    }

    /// Branch classification when no statement-opening branch was found:
    /// everything up to the next statement is either a conditional
    /// expression or a pass-bodied if.
    fn scan_simple_region(&mut self, addr: usize, next_stmt: usize) -> usize {
        let mut cur = addr;
        while cur < next_stmt {
            cur = self.proc_chained(cur);
            let arg = self.code.arg(cur);
            if self.off(cur) < arg && arg <= self.off(next_stmt) {
                if let Some(x) = self.jump(cur).and_then(|j| j.checked_sub(1)) {
                    if self.code.op(x) == Op::JumpForward
                        && self.no_same_target_between(cur, x, arg)
                    {
                        if self.starts_line(x) {
                            // `if a: pass` followed by an else clause
                            self.statement_jumps.push(cur);
                        } else {
                            self.ternary_jumps.insert(cur);
                        }
                    }
                }
            } else if arg > self.off(next_stmt) && self.code.name() == "<lambda>" {
                // lambda bodies return a conditional expression
                self.ternary_jumps.insert(cur);
            }
            cur = self.advance(cur, next_stmt);
        }
        next_stmt.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::code::{BranchKind, Code, CodeObject, Const, LoopKind, LoopSpan};
    use crate::instr::Op;

    fn words(pairs: &[(Op, u8)]) -> Vec<u8> {
        pairs.iter().flat_map(|&(op, arg)| [op as u8, arg]).collect()
    }

    fn module(pairs: &[(Op, u8)], names: &[&str], lnotab: &[u8]) -> Code {
        let obj = CodeObject {
            name: "<module>".into(),
            bytecode: words(pairs),
            consts: vec![Const::None],
            names: names.iter().map(|s| s.to_string()).collect(),
            first_line: 1,
            lnotab: lnotab.to_vec(),
            ..Default::default()
        };
        Code::new(obj, None).unwrap()
    }

    #[test]
    fn conditional_while_loop_is_classified_with_its_condition_end() {
        // while a: f()
        let code = module(
            &[
                (Op::SetupLoop, 14),
                (Op::LoadName, 0),
                (Op::PopJumpIfFalse, 14),
                (Op::LoadName, 1),
                (Op::CallFunction, 0),
                (Op::PopTop, 0),
                (Op::JumpAbsolute, 2),
                (Op::PopBlock, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ],
            &["a", "f"],
            &[6, 1],
        );
        assert_eq!(
            code.loops,
            vec![LoopSpan {
                start: 0,
                end: 7,
                kind: LoopKind::While { end_cond: 2 },
            }]
        );
        assert_eq!(code.branch_kind(2), BranchKind::Statement);
    }

    #[test]
    fn iterator_setup_marks_a_for_loop() {
        // for x in s: f(x)
        let code = module(
            &[
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
            ],
            &["s", "x", "f"],
            &[6, 1],
        );
        assert_eq!(code.loops.len(), 1);
        assert_eq!(code.loops[0].kind, LoopKind::For);
        assert_eq!(code.loops[0].start, 0);
        assert_eq!(code.loops[0].end, 10);
    }

    #[test]
    fn branch_over_an_else_clause_is_a_statement_jump() {
        // if a: x = 1
        // else: x = 2
        let code = module(
            &[
                (Op::LoadName, 0),
                (Op::PopJumpIfFalse, 10),
                (Op::LoadConst, 0),
                (Op::StoreName, 1),
                (Op::JumpForward, 4),
                (Op::LoadConst, 0),
                (Op::StoreName, 1),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ],
            &["a", "x"],
            &[4, 1, 6, 1],
        );
        assert!(code.else_jumps.contains(&1));
        assert_eq!(code.branch_kind(1), BranchKind::Statement);
    }

    #[test]
    fn inline_join_marks_a_conditional_expression() {
        // x = a if b else c
        let code = module(
            &[
                (Op::LoadName, 0),
                (Op::PopJumpIfFalse, 8),
                (Op::LoadName, 1),
                (Op::JumpForward, 2),
                (Op::LoadName, 2),
                (Op::StoreName, 3),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ],
            &["b", "a", "c", "x"],
            &[],
        );
        assert_eq!(code.branch_kind(1), BranchKind::Ternary);
    }

    #[test]
    fn multi_line_literal_builds_record_their_line_count() {
        let code = module(
            &[
                (Op::LoadConst, 0),
                (Op::LoadConst, 0),
                (Op::LoadConst, 0),
                (Op::LoadConst, 0),
                (Op::LoadConst, 0),
                (Op::BuildList, 5),
                (Op::StoreName, 0),
                (Op::LoadConst, 0),
                (Op::ReturnValue, 0),
            ],
            &["xs"],
            &[2, 1, 2, 1, 2, 1, 2, 1],
        );
        assert_eq!(code.implicit_continuation.get(&5), Some(&5));
    }
}
