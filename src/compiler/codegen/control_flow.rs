//! Structured control-flow reconstruction.
//!
//! The source bytecode branches to arbitrary forward and backward offsets;
//! Wasm only has properly nested `block`/`loop`/`if` with labels referenced
//! by relative depth. This pass turns the translator's jump placeholders
//! into an equivalent well-nested structure:
//!
//! 1. backward edges identify loops; two loops must nest or be disjoint
//! 2. conditional-plus-goto diamonds become `if`/`else` with the result type
//!    inferred from the stack state at the merge point
//! 3. exception regions become `try`/`catch`/`br_on_exn`/`rethrow` nests
//! 4. every remaining forward target becomes the end of a `block` whose
//!    start is chosen as late as possible while preserving containment and
//!    the stack discipline at the block boundary
//! 5. placeholders are rewritten to `br`/`br_if`/`br_table` with relative
//!    depths counted over the enclosing constructs
//!
//! Anything that cannot be nested this way (an irreducible graph, a jump
//! into the middle of a construct) is a structural error; the reconstructor
//! never synthesises a dispatcher.

use crate::compiler::bytecode::ExceptionHandler;
use crate::compiler::codegen::instructions::{
    BlockOp, Condition, ConstValue, JumpKind, LocalOp, NumericOp, WasmInstruction, WasmOp,
};
use crate::compiler::codegen::type_manager::TypeManager;
use crate::compiler::codegen::value_types::ValueType;
use crate::compiler::compiler_errors::WasmError;
use crate::compiler::runtime_library::RuntimeLibrary;
use crate::return_structural_error;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

pub struct ControlFlowInput<'a> {
    pub code_len: u32,
    pub exception_table: &'a [ExceptionHandler],
    /// Symbolic operand stack at every instruction offset the translator
    /// visited.
    pub stack_at: &'a FxHashMap<u32, Vec<ValueType>>,
    /// Scratch local holding the caught reference while a typed handler
    /// checks the class tag. Allocated by the translator when needed.
    pub exn_scratch: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
enum ConstructKind {
    Block,
    Loop,
    If { else_at: Option<u32> },
    Try { dispatch: Option<i32> },
}

#[derive(Debug, Clone)]
struct Construct {
    kind: ConstructKind,
    start: u32,
    end: u32,
    result: ValueType,
}

impl Construct {
    fn contains(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Order among constructs opening at the same offset: outermost first.
    fn open_rank(&self) -> u8 {
        match self.kind {
            ConstructKind::Block => 0,
            ConstructKind::Try { .. } => 1,
            ConstructKind::Loop => 2,
            ConstructKind::If { .. } => 3,
        }
    }

    /// Order among constructs closing at the same offset: innermost first.
    fn close_rank(&self) -> u8 {
        match self.kind {
            ConstructKind::If { .. } => 0,
            ConstructKind::Loop => 1,
            ConstructKind::Try { .. } => 2,
            ConstructKind::Block => 3,
        }
    }
}

/// How a conditional placeholder gets lowered.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CondRole {
    IfOpener(usize),
    BrIf,
}

struct OpenEntry {
    /// Loops are branch targets at their start, everything else at its end.
    target: u32,
}

pub fn reconstruct(
    instrs: Vec<WasmInstruction>,
    input: &ControlFlowInput<'_>,
    types: &TypeManager,
    runtime: &RuntimeLibrary,
) -> Result<Vec<WasmInstruction>, WasmError> {
    let mut reachable: Vec<u32> = input.stack_at.keys().copied().collect();
    reachable.sort_unstable();
    Reconstructor {
        instrs,
        input,
        types,
        runtime,
        reachable,
        constructs: Vec::new(),
        cond_roles: FxHashMap::default(),
        consumed_gotos: FxHashMap::default(),
    }
    .run()
}

struct Reconstructor<'a> {
    instrs: Vec<WasmInstruction>,
    input: &'a ControlFlowInput<'a>,
    types: &'a TypeManager,
    runtime: &'a RuntimeLibrary,
    /// Reachable bytecode offsets in ascending order.
    reachable: Vec<u32>,
    constructs: Vec<Construct>,
    /// Role of each conditional placeholder, keyed by list index.
    cond_roles: FxHashMap<usize, CondRole>,
    /// Goto placeholders consumed as `else` edges, keyed by list index.
    consumed_gotos: FxHashMap<usize, ()>,
}

impl<'a> Reconstructor<'a> {
    fn run(mut self) -> Result<Vec<WasmInstruction>, WasmError> {
        self.find_loops()?;
        self.find_try_regions()?;
        self.assign_conditional_roles()?;
        self.create_forward_blocks()?;
        self.validate_nesting()?;

        #[cfg(feature = "show_control_flow")]
        for construct in &self.constructs {
            println!(
                "construct {:?} [{}, {}) -> {:?}",
                construct.kind, construct.start, construct.end, construct.result
            );
        }

        self.materialize()
    }

    /// Offset of the instruction after list position `index`, which is where
    /// fall-through control continues.
    fn next_offset(&self, index: usize) -> u32 {
        self.instrs
            .get(index + 1)
            .map(|instr| instr.byte_offset)
            .unwrap_or(self.input.code_len)
    }

    fn stack_height(&self, offset: u32) -> Option<usize> {
        self.input.stack_at.get(&offset).map(|stack| stack.len())
    }

    /// Minimum stack height over the reachable offsets in `[from, to)`.
    fn region_min_height(&self, from: u32, to: u32) -> Option<usize> {
        let start = self.reachable.partition_point(|&o| o < from);
        let mut min: Option<usize> = None;
        for &offset in &self.reachable[start..] {
            if offset >= to {
                break;
            }
            let height = self.input.stack_at[&offset].len();
            min = Some(min.map_or(height, |m| m.min(height)));
        }
        min
    }

    /// Latest reachable offset at or before `limit` whose stack height is
    /// exactly `height`.
    fn latest_offset_with_height(&self, limit: u32, height: usize) -> Option<u32> {
        let end = self.reachable.partition_point(|&o| o <= limit);
        self.reachable[..end]
            .iter()
            .rev()
            .copied()
            .find(|offset| self.input.stack_at[offset].len() == height)
    }

    // =========================================================================
    // Loop identification
    // =========================================================================

    fn find_loops(&mut self) -> Result<(), WasmError> {
        // header offset -> end of the loop (just past the last back edge)
        let mut headers: BTreeMap<u32, u32> = BTreeMap::new();
        for (index, instr) in self.instrs.iter().enumerate() {
            let WasmOp::JumpPlaceholder(jump) = &instr.op else {
                continue;
            };
            for target in jump.targets() {
                if target <= instr.byte_offset {
                    let end = self.next_offset(index);
                    let entry = headers.entry(target).or_insert(end);
                    if *entry < end {
                        *entry = end;
                    }
                }
            }
        }

        for (&start, &end) in &headers {
            let entry_height = match self.stack_height(start) {
                Some(height) => height,
                None => return_structural_error!("loop header at offset {} is unreachable", start),
            };
            if let Some(min) = self.region_min_height(start, end) {
                if min < entry_height {
                    return_structural_error!(
                        "loop body at offset {} consumes values pushed before the loop",
                        start
                    );
                }
            }
            self.constructs.push(Construct {
                kind: ConstructKind::Loop,
                start,
                end,
                result: ValueType::Void,
            });
        }

        // Two loops either nest strictly or are disjoint.
        for i in 0..self.constructs.len() {
            for j in (i + 1)..self.constructs.len() {
                let (a, b) = (&self.constructs[i], &self.constructs[j]);
                if intersects(a, b) && !nested(a, b) {
                    return_structural_error!(
                        "irreducible control flow: loops at offsets {} and {} overlap",
                        a.start,
                        b.start
                    );
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Exception regions
    // =========================================================================

    fn find_try_regions(&mut self) -> Result<(), WasmError> {
        for handler in self.input.exception_table {
            if handler.handler_pc < handler.end_pc {
                return_structural_error!(
                    "exception handler at offset {} lies inside its protected region",
                    handler.handler_pc
                );
            }
            if self.stack_height(handler.start_pc) != Some(0) {
                return_structural_error!(
                    "protected region at offset {} does not start on an empty stack",
                    handler.start_pc
                );
            }
            if self.constructs.iter().any(|c| {
                matches!(c.kind, ConstructKind::Try { .. })
                    && c.start == handler.start_pc
                    && c.end == handler.handler_pc
            }) {
                continue;
            }
            let dispatch = match &handler.catch_type {
                Some(class_name) => Some(self.types.vtable_offset(class_name)? as i32),
                None => None,
            };
            self.constructs.push(Construct {
                kind: ConstructKind::Try { dispatch },
                start: handler.start_pc,
                end: handler.handler_pc,
                result: ValueType::Externref,
            });
        }
        Ok(())
    }

    // =========================================================================
    // If/else reconstruction
    // =========================================================================

    fn assign_conditional_roles(&mut self) -> Result<(), WasmError> {
        for index in 0..self.instrs.len() {
            let WasmOp::JumpPlaceholder(JumpKind::Conditional { target, .. }) =
                &self.instrs[index].op
            else {
                continue;
            };
            let target = *target;
            let at = self.instrs[index].byte_offset;
            if target <= at {
                // Backward conditional: br_if to the loop header
                self.cond_roles.insert(index, CondRole::BrIf);
                continue;
            }
            let fallthrough = self.next_offset(index);

            if let Some(role) = self.try_if_else(index, at, fallthrough, target) {
                self.cond_roles.insert(index, role);
                continue;
            }
            if let Some(role) = self.try_bare_if(at, fallthrough, target) {
                self.cond_roles.insert(index, role);
                continue;
            }
            self.cond_roles.insert(index, CondRole::BrIf);
        }
        Ok(())
    }

    /// True when any jump other than `except` can transfer control to
    /// `offset`. An `else` edge must be the only way in.
    fn has_other_branch_to(&self, offset: u32, except: usize) -> bool {
        self.instrs.iter().enumerate().any(|(index, instr)| {
            index != except
                && matches!(&instr.op, WasmOp::JumpPlaceholder(jump) if jump.targets().contains(&offset))
        })
    }

    /// Diamond detection: the last instruction of the then-arm is an
    /// unconditional forward goto over the else-arm.
    fn try_if_else(
        &mut self,
        cond_index: usize,
        at: u32,
        fallthrough: u32,
        else_start: u32,
    ) -> Option<CondRole> {
        let mut goto: Option<(usize, u32)> = None;
        for (index, instr) in self.instrs.iter().enumerate().skip(cond_index + 1) {
            if instr.byte_offset >= else_start {
                break;
            }
            if self.consumed_gotos.contains_key(&index) {
                continue;
            }
            if let WasmOp::JumpPlaceholder(JumpKind::Goto { target }) = &instr.op {
                if self.next_offset(index) == else_start && *target > else_start {
                    goto = Some((index, *target));
                }
            }
        }
        let (goto_index, merge) = goto?;

        // The else-arm may only be entered through this conditional.
        if self.has_other_branch_to(else_start, cond_index) {
            return None;
        }

        let base = self.stack_height(fallthrough)?;
        let at_else = self.stack_height(else_start)?;
        let at_merge = self.stack_height(merge)?;
        if at_else != base {
            return None;
        }
        if let Some(min) = self.region_min_height(fallthrough, merge) {
            if min < base {
                return None;
            }
        }
        let result = match at_merge.checked_sub(base) {
            Some(0) => ValueType::Void,
            Some(1) => *self.input.stack_at.get(&merge)?.last()?,
            _ => return None,
        };
        if !self.fits_nesting(at, merge) {
            return None;
        }

        self.consumed_gotos.insert(goto_index, ());
        self.constructs.push(Construct {
            kind: ConstructKind::If {
                else_at: Some(else_start),
            },
            start: at,
            end: merge,
            result,
        });
        Some(CondRole::IfOpener(self.constructs.len() - 1))
    }

    /// No else-arm: the region up to the target merges with equal stack
    /// height, so an empty-result `if` suffices.
    fn try_bare_if(&mut self, at: u32, fallthrough: u32, target: u32) -> Option<CondRole> {
        let base = self.stack_height(fallthrough)?;
        let at_end = self.stack_height(target)?;
        if at_end != base || !self.fits_nesting(at, target) {
            return None;
        }
        if let Some(min) = self.region_min_height(fallthrough, target) {
            if min < base {
                return None;
            }
        }
        self.constructs.push(Construct {
            kind: ConstructKind::If { else_at: None },
            start: at,
            end: target,
            result: ValueType::Void,
        });
        Some(CondRole::IfOpener(self.constructs.len() - 1))
    }

    fn fits_nesting(&self, start: u32, end: u32) -> bool {
        let candidate = Construct {
            kind: ConstructKind::Block,
            start,
            end,
            result: ValueType::Void,
        };
        self.constructs
            .iter()
            .all(|c| !intersects(c, &candidate) || nested(c, &candidate))
    }

    // =========================================================================
    // Blocks for the remaining forward targets
    // =========================================================================

    fn create_forward_blocks(&mut self) -> Result<(), WasmError> {
        // target offset -> earliest branch position
        let mut targets: BTreeMap<u32, u32> = BTreeMap::new();
        for (index, instr) in self.instrs.iter().enumerate() {
            let WasmOp::JumpPlaceholder(jump) = &instr.op else {
                continue;
            };
            if matches!(self.cond_roles.get(&index), Some(CondRole::IfOpener(_)))
                || self.consumed_gotos.contains_key(&index)
            {
                continue;
            }
            for target in jump.targets() {
                if target > instr.byte_offset {
                    let entry = targets.entry(target).or_insert(instr.byte_offset);
                    if *entry > instr.byte_offset {
                        *entry = instr.byte_offset;
                    }
                }
            }
        }

        for (&end, &earliest) in &targets {
            let target_height = match self.stack_height(end) {
                Some(height) => height,
                None => return_structural_error!("branch target {} is unreachable", end),
            };

            // Start as late as possible, then widen until both the
            // containment relation and the stack discipline hold: the block
            // must open on the stack height its label merges at, and no
            // offset inside may dip below that height.
            let mut start = earliest;
            loop {
                let mut widened = false;

                let base = self
                    .region_min_height(start, end)
                    .map_or(target_height, |min| min.min(target_height));
                match self.stack_height(start) {
                    Some(height) if height == base => {}
                    _ => {
                        match self.latest_offset_with_height(start, base) {
                            Some(offset) => {
                                start = offset;
                                widened = true;
                            }
                            None => return_structural_error!(
                                "stack mismatch at merge offset {}: no valid block start",
                                end
                            ),
                        }
                    }
                }

                for c in &self.constructs {
                    if c.start < start && c.contains(start) && c.end < end {
                        start = c.start;
                        widened = true;
                    }
                }
                if !widened {
                    break;
                }
            }

            let base = self.stack_height(start).unwrap_or(0);
            let result = match target_height.checked_sub(base) {
                Some(0) => ValueType::Void,
                Some(1) => self.input.stack_at[&end][target_height - 1],
                _ => return_structural_error!(
                    "stack mismatch at merge offset {}: {} values at the block start, {} at its end",
                    end,
                    base,
                    target_height
                ),
            };
            self.constructs.push(Construct {
                kind: ConstructKind::Block,
                start,
                end,
                result,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn validate_nesting(&self) -> Result<(), WasmError> {
        for i in 0..self.constructs.len() {
            for j in (i + 1)..self.constructs.len() {
                let (a, b) = (&self.constructs[i], &self.constructs[j]);
                if intersects(a, b) && !nested(a, b) {
                    return_structural_error!(
                        "no valid nesting: regions [{}, {}) and [{}, {}) overlap",
                        a.start,
                        a.end,
                        b.start,
                        b.end
                    );
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Materialisation and relative-depth fixup
    // =========================================================================

    fn materialize(mut self) -> Result<Vec<WasmInstruction>, WasmError> {
        // Events keyed by offset; each list is sorted before emission.
        let mut opens_at: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        let mut closes_at: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        let mut elses_at: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (id, construct) in self.constructs.iter().enumerate() {
            if !matches!(construct.kind, ConstructKind::If { .. }) {
                opens_at.entry(construct.start).or_default().push(id);
            }
            closes_at.entry(construct.end).or_default().push(id);
            if let ConstructKind::If {
                else_at: Some(else_at),
            } = construct.kind
            {
                elses_at.entry(else_at).or_default().push(id);
            }
        }
        for list in opens_at.values_mut() {
            list.sort_by(|&a, &b| {
                let (ca, cb) = (&self.constructs[a], &self.constructs[b]);
                cb.end.cmp(&ca.end).then(ca.open_rank().cmp(&cb.open_rank()))
            });
        }
        for list in closes_at.values_mut() {
            list.sort_by(|&a, &b| {
                let (ca, cb) = (&self.constructs[a], &self.constructs[b]);
                cb.start
                    .cmp(&ca.start)
                    .then(ca.close_rank().cmp(&cb.close_rank()))
            });
        }
        for list in elses_at.values_mut() {
            list.sort_by(|&a, &b| self.constructs[b].start.cmp(&self.constructs[a].start));
        }

        let mut out: Vec<WasmInstruction> = Vec::with_capacity(self.instrs.len() * 2);
        let mut open_stack: Vec<OpenEntry> = Vec::new();
        let mut cursor = 0u32;

        let instrs = std::mem::take(&mut self.instrs);
        for (index, instr) in instrs.iter().enumerate() {
            let offset = instr.byte_offset;
            if offset >= cursor {
                self.emit_events(
                    &opens_at,
                    &closes_at,
                    &elses_at,
                    cursor,
                    offset,
                    &mut open_stack,
                    &mut out,
                )?;
                cursor = offset + 1;
            }
            self.emit_instruction(index, instr, &mut open_stack, &mut out)?;
        }
        self.emit_events(
            &opens_at,
            &closes_at,
            &elses_at,
            cursor,
            self.input.code_len,
            &mut open_stack,
            &mut out,
        )?;

        if !open_stack.is_empty() {
            return_structural_error!("{} structured constructs left unclosed", open_stack.len());
        }
        Ok(out)
    }

    /// Emit close/else/open events for every offset in `[from, to]`.
    #[allow(clippy::too_many_arguments)]
    fn emit_events(
        &self,
        opens_at: &BTreeMap<u32, Vec<usize>>,
        closes_at: &BTreeMap<u32, Vec<usize>>,
        elses_at: &BTreeMap<u32, Vec<usize>>,
        from: u32,
        to: u32,
        open_stack: &mut Vec<OpenEntry>,
        out: &mut Vec<WasmInstruction>,
    ) -> Result<(), WasmError> {
        let mut offsets: Vec<u32> = Vec::new();
        offsets.extend(closes_at.range(from..=to).map(|(&o, _)| o));
        offsets.extend(elses_at.range(from..=to).map(|(&o, _)| o));
        offsets.extend(opens_at.range(from..=to).map(|(&o, _)| o));
        offsets.sort_unstable();
        offsets.dedup();

        for o in offsets {
            if let Some(closes) = closes_at.get(&o) {
                for &id in closes {
                    self.emit_close(id, o, open_stack, out)?;
                }
            }
            if elses_at.contains_key(&o) {
                for _ in &elses_at[&o] {
                    out.push(WasmInstruction::new(WasmOp::Block(BlockOp::Else), o, 0));
                }
            }
            if let Some(opens) = opens_at.get(&o) {
                for &id in opens {
                    self.emit_open(id, o, open_stack, out);
                }
            }
        }
        Ok(())
    }

    fn emit_open(
        &self,
        id: usize,
        offset: u32,
        open_stack: &mut Vec<OpenEntry>,
        out: &mut Vec<WasmInstruction>,
    ) {
        let construct = &self.constructs[id];
        let (op, target) = match construct.kind {
            ConstructKind::Block => (
                WasmOp::Block(BlockOp::Block {
                    result: construct.result,
                }),
                construct.end,
            ),
            ConstructKind::Loop => (WasmOp::Block(BlockOp::Loop), construct.start),
            ConstructKind::Try { .. } => (
                WasmOp::Block(BlockOp::Try {
                    result: ValueType::Externref,
                }),
                construct.end,
            ),
            ConstructKind::If { .. } => unreachable!("if constructs open at their placeholder"),
        };
        out.push(WasmInstruction::new(op, offset, 0));
        open_stack.push(OpenEntry { target });
    }

    fn emit_close(
        &self,
        id: usize,
        offset: u32,
        open_stack: &mut Vec<OpenEntry>,
        out: &mut Vec<WasmInstruction>,
    ) -> Result<(), WasmError> {
        let construct = &self.constructs[id];
        if let ConstructKind::Try { dispatch } = construct.kind {
            // catch; if it carries our event, branch to the handler with the
            // payload; anything else unwinds further out.
            out.push(WasmInstruction::new(WasmOp::Block(BlockOp::Catch), offset, 0));
            let depth = resolve_depth(open_stack, construct.end)?;
            out.push(WasmInstruction::new(
                WasmOp::Block(BlockOp::BrOnExn { depth }),
                offset,
                0,
            ));
            out.push(WasmInstruction::new(
                WasmOp::Block(BlockOp::Rethrow),
                offset,
                0,
            ));
            out.push(WasmInstruction::new(WasmOp::Block(BlockOp::End), offset, 0));
            open_stack.pop();
            if let Some(class_offset) = dispatch {
                self.emit_catch_dispatch(class_offset, offset, out);
            }
            return Ok(());
        }

        out.push(WasmInstruction::new(WasmOp::Block(BlockOp::End), offset, 0));
        open_stack.pop();
        Ok(())
    }

    /// Typed handler entry: test the caught reference's class tag; a
    /// mismatch re-throws so an outer region can take it.
    fn emit_catch_dispatch(&self, class_offset: i32, offset: u32, out: &mut Vec<WasmInstruction>) {
        let scratch = self
            .input
            .exn_scratch
            .expect("translator allocates the scratch local for typed handlers");
        let mut push = |op: WasmOp| out.push(WasmInstruction::new(op, offset, 0));
        push(WasmOp::Local {
            op: LocalOp::Set,
            index: scratch,
        });
        push(WasmOp::Local {
            op: LocalOp::Get,
            index: scratch,
        });
        push(WasmOp::Const(ConstValue::I32(class_offset)));
        push(WasmOp::Call {
            name: self.runtime.instance_of(),
        });
        push(WasmOp::Numeric {
            op: NumericOp::Eqz,
            ty: ValueType::I32,
        });
        push(WasmOp::Block(BlockOp::If {
            result: ValueType::Void,
        }));
        push(WasmOp::Local {
            op: LocalOp::Get,
            index: scratch,
        });
        push(WasmOp::Block(BlockOp::Throw));
        push(WasmOp::Block(BlockOp::End));
        push(WasmOp::Local {
            op: LocalOp::Get,
            index: scratch,
        });
    }

    fn emit_instruction(
        &self,
        index: usize,
        instr: &WasmInstruction,
        open_stack: &mut Vec<OpenEntry>,
        out: &mut Vec<WasmInstruction>,
    ) -> Result<(), WasmError> {
        let WasmOp::JumpPlaceholder(jump) = &instr.op else {
            out.push(instr.clone());
            return Ok(());
        };
        let offset = instr.byte_offset;
        let line = instr.source_line;

        match jump {
            JumpKind::Goto { target } => {
                if self.consumed_gotos.contains_key(&index) {
                    // Absorbed into an if/else as the edge to `end`; the
                    // `else` marker is emitted by its offset event.
                    return Ok(());
                }
                let depth = resolve_depth(open_stack, *target)?;
                out.push(WasmInstruction::new(
                    WasmOp::Block(BlockOp::Br { depth }),
                    offset,
                    line,
                ));
            }
            JumpKind::Conditional {
                cond,
                jump_if_false,
                target,
            } => match self.cond_roles.get(&index) {
                Some(CondRole::IfOpener(id)) => {
                    let construct = &self.constructs[*id];
                    // `if` runs its then-arm on the fall-through side, so it
                    // tests the complement of the jump predicate.
                    for op in self.condition_ops(*cond, *jump_if_false) {
                        out.push(WasmInstruction::new(op, offset, line));
                    }
                    out.push(WasmInstruction::new(
                        WasmOp::Block(BlockOp::If {
                            result: construct.result,
                        }),
                        offset,
                        line,
                    ));
                    open_stack.push(OpenEntry {
                        target: construct.end,
                    });
                }
                _ => {
                    for op in self.condition_ops(*cond, !*jump_if_false) {
                        out.push(WasmInstruction::new(op, offset, line));
                    }
                    let depth = resolve_depth(open_stack, *target)?;
                    out.push(WasmInstruction::new(
                        WasmOp::Block(BlockOp::BrIf { depth }),
                        offset,
                        line,
                    ));
                }
            },
            JumpKind::TableSwitch {
                low,
                targets,
                default,
            } => {
                if *low != 0 {
                    out.push(WasmInstruction::new(
                        WasmOp::Const(ConstValue::I32(*low)),
                        offset,
                        line,
                    ));
                    out.push(WasmInstruction::new(
                        WasmOp::Numeric {
                            op: NumericOp::Sub,
                            ty: ValueType::I32,
                        },
                        offset,
                        line,
                    ));
                }
                let mut depths = Vec::with_capacity(targets.len());
                for target in targets {
                    depths.push(resolve_depth(open_stack, *target)?);
                }
                let default = resolve_depth(open_stack, *default)?;
                out.push(WasmInstruction::new(
                    WasmOp::Block(BlockOp::BrTable { depths, default }),
                    offset,
                    line,
                ));
            }
            JumpKind::LookupSwitch {
                pairs,
                default,
                scratch,
            } => {
                if let Some(low) = dense_keys(pairs) {
                    let targets = pairs.iter().map(|(_, t)| *t).collect::<Vec<_>>();
                    let table = JumpKind::TableSwitch {
                        low,
                        targets,
                        default: *default,
                    };
                    let dense = WasmInstruction::new(WasmOp::JumpPlaceholder(table), offset, line);
                    return self.emit_instruction(index, &dense, open_stack, out);
                }

                // Sparse: compare chain over a scratch local, ascending keys.
                let mut sorted = pairs.clone();
                sorted.sort_by_key(|(key, _)| *key);
                out.push(WasmInstruction::new(
                    WasmOp::Local {
                        op: LocalOp::Set,
                        index: *scratch,
                    },
                    offset,
                    line,
                ));
                for (key, target) in &sorted {
                    let depth = resolve_depth(open_stack, *target)?;
                    out.push(WasmInstruction::new(
                        WasmOp::Local {
                            op: LocalOp::Get,
                            index: *scratch,
                        },
                        offset,
                        line,
                    ));
                    out.push(WasmInstruction::new(
                        WasmOp::Const(ConstValue::I32(*key)),
                        offset,
                        line,
                    ));
                    out.push(WasmInstruction::new(
                        WasmOp::Numeric {
                            op: NumericOp::Eq,
                            ty: ValueType::I32,
                        },
                        offset,
                        line,
                    ));
                    out.push(WasmInstruction::new(
                        WasmOp::Block(BlockOp::BrIf { depth }),
                        offset,
                        line,
                    ));
                }
                let depth = resolve_depth(open_stack, *default)?;
                out.push(WasmInstruction::new(
                    WasmOp::Block(BlockOp::Br { depth }),
                    offset,
                    line,
                ));
            }
        }
        Ok(())
    }

    /// Instructions realising a condition. With `emit_p` the emitted code
    /// leaves the condition's base predicate on the stack; without it, the
    /// complement. Integer predicates invert through the complementary
    /// comparison; float predicates append `i32.eqz` so NaN stays on the
    /// false side.
    ///
    /// The jump predicate is the base predicate unless `jump_if_false`
    /// marked the condition, so `br_if` sites pass `!jump_if_false` and
    /// `if` openers pass `jump_if_false`.
    fn condition_ops(&self, cond: Condition, emit_p: bool) -> Vec<WasmOp> {
        let negate = !emit_p;
        match cond {
            Condition::Eqz => {
                if negate {
                    // the value itself is the truth of "not zero"
                    Vec::new()
                } else {
                    vec![WasmOp::Numeric {
                        op: NumericOp::Eqz,
                        ty: ValueType::I32,
                    }]
                }
            }
            Condition::CmpZero(op) => {
                let op = if negate { op.invert() } else { op };
                vec![
                    WasmOp::Const(ConstValue::I32(0)),
                    WasmOp::Numeric {
                        op: op.numeric_op(ValueType::I32),
                        ty: ValueType::I32,
                    },
                ]
            }
            Condition::Cmp { op, ty } => {
                if matches!(ty, ValueType::F32 | ValueType::F64) {
                    let mut ops = vec![WasmOp::Numeric {
                        op: op.numeric_op(ty),
                        ty,
                    }];
                    if negate {
                        ops.push(WasmOp::Numeric {
                            op: NumericOp::Eqz,
                            ty: ValueType::I32,
                        });
                    }
                    ops
                } else {
                    let op = if negate { op.invert() } else { op };
                    vec![WasmOp::Numeric {
                        op: op.numeric_op(ty),
                        ty,
                    }]
                }
            }
            Condition::Null => {
                let mut ops = vec![WasmOp::Numeric {
                    op: NumericOp::RefIsNull,
                    ty: ValueType::Externref,
                }];
                if negate {
                    ops.push(WasmOp::Numeric {
                        op: NumericOp::Eqz,
                        ty: ValueType::I32,
                    });
                }
                ops
            }
            Condition::RefEq => {
                let mut ops = vec![WasmOp::Call {
                    name: self.runtime.ref_eq(),
                }];
                if negate {
                    ops.push(WasmOp::Numeric {
                        op: NumericOp::Eqz,
                        ty: ValueType::I32,
                    });
                }
                ops
            }
        }
    }
}

/// Relative depth of the innermost enclosing construct whose label sits at
/// `target`: loops match at their start, everything else at its end.
fn resolve_depth(open_stack: &[OpenEntry], target: u32) -> Result<u32, WasmError> {
    for (depth, entry) in open_stack.iter().rev().enumerate() {
        if entry.target == target {
            return Ok(depth as u32);
        }
    }
    return_structural_error!(
        "no enclosing construct for a branch to offset {}: irreducible control flow",
        target
    )
}

fn intersects(a: &Construct, b: &Construct) -> bool {
    a.start < b.end && b.start < a.end
}

fn nested(a: &Construct, b: &Construct) -> bool {
    (a.start <= b.start && b.end <= a.end) || (b.start <= a.start && a.end <= b.end)
}

/// Keys that form a contiguous ascending run lower to `br_table` directly.
fn dense_keys(pairs: &[(i32, u32)]) -> Option<i32> {
    let first = pairs.first()?.0;
    for (index, (key, _)) in pairs.iter().enumerate() {
        if i64::from(*key) != i64::from(first) + index as i64 {
            return None;
        }
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::CompilerOptions;

    fn instr(op: WasmOp, offset: u32) -> WasmInstruction {
        WasmInstruction::new(op, offset, 0)
    }

    fn stack_map(entries: &[(u32, Vec<ValueType>)]) -> FxHashMap<u32, Vec<ValueType>> {
        entries.iter().cloned().collect()
    }

    fn run(
        instrs: Vec<WasmInstruction>,
        code_len: u32,
        stack_at: FxHashMap<u32, Vec<ValueType>>,
    ) -> Result<Vec<WasmInstruction>, WasmError> {
        let types = TypeManager::new();
        let runtime = RuntimeLibrary::new(&CompilerOptions::default()).unwrap();
        let input = ControlFlowInput {
            code_len,
            exception_table: &[],
            stack_at: &stack_at,
            exn_scratch: None,
        };
        reconstruct(instrs, &input, &types, &runtime)
    }

    /// `cond != 0 ? 13 : 76` lowers to one if/else with result i32.
    #[test]
    fn ternary_becomes_if_else_with_result() {
        // 0: local.get 0
        // 1: ifeq -> 9
        // 4: const 13
        // 6: goto -> 11
        // 9: const 76
        // 11: (merge, value on stack)
        let instrs = vec![
            instr(WasmOp::Local { op: LocalOp::Get, index: 0 }, 0),
            instr(
                WasmOp::JumpPlaceholder(JumpKind::Conditional {
                    cond: Condition::Eqz,
                    jump_if_false: false,
                    target: 9,
                }),
                1,
            ),
            instr(WasmOp::Const(ConstValue::I32(13)), 4),
            instr(WasmOp::JumpPlaceholder(JumpKind::Goto { target: 11 }), 6),
            instr(WasmOp::Const(ConstValue::I32(76)), 9),
            instr(WasmOp::Block(BlockOp::Return), 11),
        ];
        let stacks = stack_map(&[
            (0, vec![]),
            (1, vec![ValueType::I32]),
            (4, vec![]),
            (6, vec![ValueType::I32]),
            (9, vec![]),
            (11, vec![ValueType::I32]),
        ]);
        let out = run(instrs, 12, stacks).unwrap();

        let if_count = out
            .iter()
            .filter(|i| matches!(i.op, WasmOp::Block(BlockOp::If { .. })))
            .count();
        let else_count = out
            .iter()
            .filter(|i| matches!(i.op, WasmOp::Block(BlockOp::Else)))
            .count();
        assert_eq!(if_count, 1);
        assert_eq!(else_count, 1);
        assert!(out.iter().any(|i| matches!(
            i.op,
            WasmOp::Block(BlockOp::If {
                result: ValueType::I32
            })
        )));
        // ifeq's fall-through arm runs when the value is non-zero, so the
        // condition is the value itself: no extra compare before the if.
        let if_pos = out
            .iter()
            .position(|i| matches!(i.op, WasmOp::Block(BlockOp::If { .. })))
            .unwrap();
        assert!(matches!(
            out[if_pos - 1].op,
            WasmOp::Local { op: LocalOp::Get, .. }
        ));
        assert_balanced(&out);
    }

    /// A do-while loop: backward conditional branch.
    #[test]
    fn backward_branch_becomes_loop_with_br_if() {
        // 0: body
        // 1: local.get 0
        // 2: ifne -> 0
        let instrs = vec![
            instr(WasmOp::Block(BlockOp::MonitorEnter), 0),
            instr(WasmOp::Local { op: LocalOp::Get, index: 0 }, 1),
            instr(
                WasmOp::JumpPlaceholder(JumpKind::Conditional {
                    cond: Condition::Eqz,
                    jump_if_false: true,
                    target: 0,
                }),
                2,
            ),
        ];
        let stacks = stack_map(&[(0, vec![]), (1, vec![]), (2, vec![ValueType::I32])]);
        let out = run(instrs, 5, stacks).unwrap();

        assert!(matches!(out[0].op, WasmOp::Block(BlockOp::Loop)));
        // "jump when the value is non-zero": the value itself feeds br_if
        // with no extra compare.
        let br_pos = out
            .iter()
            .position(|i| matches!(i.op, WasmOp::Block(BlockOp::BrIf { depth: 0 })))
            .unwrap();
        assert!(matches!(
            out[br_pos - 1].op,
            WasmOp::Local { op: LocalOp::Get, .. }
        ));
        assert_balanced(&out);
    }

    /// Forward branch out of a loop needs a block wrapping the loop, and the
    /// exit condition's operand must stay inside the block frame.
    #[test]
    fn loop_exit_branch_gets_an_enclosing_block() {
        // 0: local.get 0   (loop header)
        // 1: ifeq -> 8     (exit)
        // 4: goto -> 0     (back edge)
        // 8: after loop
        let instrs = vec![
            instr(WasmOp::Local { op: LocalOp::Get, index: 0 }, 0),
            instr(
                WasmOp::JumpPlaceholder(JumpKind::Conditional {
                    cond: Condition::Eqz,
                    jump_if_false: false,
                    target: 8,
                }),
                1,
            ),
            instr(WasmOp::JumpPlaceholder(JumpKind::Goto { target: 0 }), 4),
            instr(WasmOp::Block(BlockOp::Return), 8),
        ];
        let stacks = stack_map(&[
            (0, vec![]),
            (1, vec![ValueType::I32]),
            (4, vec![]),
            (8, vec![]),
        ]);
        let out = run(instrs, 9, stacks).unwrap();

        // block { loop { local.get ; eqz ; br_if 1 ; br 0 } }
        assert!(matches!(out[0].op, WasmOp::Block(BlockOp::Block { .. })));
        assert!(matches!(out[1].op, WasmOp::Block(BlockOp::Loop)));
        let br_if_pos = out
            .iter()
            .position(|i| matches!(i.op, WasmOp::Block(BlockOp::BrIf { depth: 1 })))
            .expect("exit br_if targets the wrapping block");
        assert!(matches!(
            out[br_if_pos - 1].op,
            WasmOp::Numeric {
                op: NumericOp::Eqz,
                ..
            }
        ));
        assert!(out
            .iter()
            .any(|i| matches!(i.op, WasmOp::Block(BlockOp::Br { depth: 0 }))));
        assert_balanced(&out);
    }

    #[test]
    fn overlapping_loops_are_rejected() {
        // back edges 6->0 and 8->3 produce loops [0,8) and [3,10): overlap
        let instrs = vec![
            instr(WasmOp::Block(BlockOp::MonitorEnter), 0),
            instr(WasmOp::Block(BlockOp::MonitorEnter), 3),
            instr(WasmOp::JumpPlaceholder(JumpKind::Goto { target: 0 }), 6),
            instr(WasmOp::JumpPlaceholder(JumpKind::Goto { target: 3 }), 8),
        ];
        let stacks = stack_map(&[(0, vec![]), (3, vec![]), (6, vec![]), (8, vec![])]);
        let err = run(instrs, 11, stacks).unwrap_err();
        assert!(err.msg.contains("irreducible") || err.msg.contains("overlap"));
    }

    #[test]
    fn sparse_switch_lowers_to_a_compare_chain() {
        let instrs = vec![
            instr(WasmOp::Local { op: LocalOp::Get, index: 0 }, 0),
            instr(
                WasmOp::JumpPlaceholder(JumpKind::LookupSwitch {
                    pairs: vec![(1, 8), (1000, 10), (1001, 12), (i32::MAX, 14)],
                    default: 16,
                    scratch: 1,
                }),
                1,
            ),
            instr(WasmOp::Block(BlockOp::Return), 8),
            instr(WasmOp::Block(BlockOp::Return), 10),
            instr(WasmOp::Block(BlockOp::Return), 12),
            instr(WasmOp::Block(BlockOp::Return), 14),
            instr(WasmOp::Block(BlockOp::Return), 16),
        ];
        let stacks = stack_map(&[
            (0, vec![]),
            (1, vec![ValueType::I32]),
            (8, vec![]),
            (10, vec![]),
            (12, vec![]),
            (14, vec![]),
            (16, vec![]),
        ]);
        let out = run(instrs, 17, stacks).unwrap();

        let br_if_count = out
            .iter()
            .filter(|i| matches!(i.op, WasmOp::Block(BlockOp::BrIf { .. })))
            .count();
        // one conditional exit per case, plus the unconditional default br
        assert_eq!(br_if_count, 4);
        assert!(out
            .iter()
            .any(|i| matches!(i.op, WasmOp::Block(BlockOp::Br { .. }))));
        assert_balanced(&out);
    }

    #[test]
    fn contiguous_switch_keys_lower_to_br_table() {
        let instrs = vec![
            instr(WasmOp::Local { op: LocalOp::Get, index: 0 }, 0),
            instr(
                WasmOp::JumpPlaceholder(JumpKind::LookupSwitch {
                    pairs: vec![(5, 8), (6, 10), (7, 12)],
                    default: 14,
                    scratch: 1,
                }),
                1,
            ),
            instr(WasmOp::Block(BlockOp::Return), 8),
            instr(WasmOp::Block(BlockOp::Return), 10),
            instr(WasmOp::Block(BlockOp::Return), 12),
            instr(WasmOp::Block(BlockOp::Return), 14),
        ];
        let stacks = stack_map(&[
            (0, vec![]),
            (1, vec![ValueType::I32]),
            (8, vec![]),
            (10, vec![]),
            (12, vec![]),
            (14, vec![]),
        ]);
        let out = run(instrs, 15, stacks).unwrap();

        let table = out
            .iter()
            .find_map(|i| match &i.op {
                WasmOp::Block(BlockOp::BrTable { depths, .. }) => Some(depths.len()),
                _ => None,
            })
            .expect("br_table emitted");
        assert_eq!(table, 3);
        // low key is 5, so the selector is rebased first
        assert!(out
            .iter()
            .any(|i| matches!(i.op, WasmOp::Const(ConstValue::I32(5)))));
        assert_balanced(&out);
    }

    /// `a && b` nests two ifs without any explicit block.
    #[test]
    fn short_circuit_and_nests_ifs() {
        // 0: local.get 0
        // 1: ifeq -> 12
        // 4: local.get 1
        // 5: ifeq -> 12
        // 8: body
        let instrs = vec![
            instr(WasmOp::Local { op: LocalOp::Get, index: 0 }, 0),
            instr(
                WasmOp::JumpPlaceholder(JumpKind::Conditional {
                    cond: Condition::Eqz,
                    jump_if_false: false,
                    target: 12,
                }),
                1,
            ),
            instr(WasmOp::Local { op: LocalOp::Get, index: 1 }, 4),
            instr(
                WasmOp::JumpPlaceholder(JumpKind::Conditional {
                    cond: Condition::Eqz,
                    jump_if_false: false,
                    target: 12,
                }),
                5,
            ),
            instr(WasmOp::Block(BlockOp::MonitorEnter), 8),
        ];
        let stacks = stack_map(&[
            (0, vec![]),
            (1, vec![ValueType::I32]),
            (4, vec![]),
            (5, vec![ValueType::I32]),
            (8, vec![]),
            (12, vec![]),
        ]);
        let out = run(instrs, 12, stacks).unwrap();

        let if_count = out
            .iter()
            .filter(|i| matches!(i.op, WasmOp::Block(BlockOp::If { .. })))
            .count();
        assert_eq!(if_count, 2);
        assert!(!out
            .iter()
            .any(|i| matches!(i.op, WasmOp::Block(BlockOp::Br { .. } | BlockOp::BrIf { .. }))));
        assert_balanced(&out);
    }

    /// Spec §8: openers and ends balance, and no br exceeds its depth.
    fn assert_balanced(instrs: &[WasmInstruction]) {
        let mut depth: i64 = 0;
        for instr in instrs {
            match &instr.op {
                WasmOp::Block(BlockOp::Block { .. })
                | WasmOp::Block(BlockOp::Loop)
                | WasmOp::Block(BlockOp::If { .. })
                | WasmOp::Block(BlockOp::Try { .. }) => depth += 1,
                WasmOp::Block(BlockOp::End) => {
                    depth -= 1;
                    assert!(depth >= 0, "unbalanced end");
                }
                WasmOp::Block(BlockOp::Br { depth: d })
                | WasmOp::Block(BlockOp::BrIf { depth: d })
                | WasmOp::Block(BlockOp::BrOnExn { depth: d }) => {
                    assert!(i64::from(*d) < depth, "branch depth exceeds nesting");
                }
                WasmOp::Block(BlockOp::BrTable { depths, default }) => {
                    for d in depths.iter().chain(std::iter::once(default)) {
                        assert!(i64::from(*d) < depth, "br_table depth exceeds nesting");
                    }
                }
                WasmOp::JumpPlaceholder(_) => panic!("placeholder survived reconstruction"),
                _ => {}
            }
        }
        assert_eq!(depth, 0, "constructs left open");
    }
}
