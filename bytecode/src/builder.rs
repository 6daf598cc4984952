use crate::assembler;
use crate::error::AssembleError;
use crate::exceptions::{ExceptionTable, RegionTracker, Suspension};
use crate::instruction::{Operand, Symbolic};
use crate::line_table::LineTableBuilder;
use crate::literal::{Literal, LiteralPool};
use crate::method::{CompiledMethod, MethodInfo};
use crate::op::Op;
use crate::stack;

/// A jump target inside one [`BytecodeBuilder`].
///
/// Created by [`BytecodeBuilder::new_label`]; any number of jumps may refer
/// to it before or after it is placed with [`BytecodeBuilder::mark_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LabelInfo {
    pub name: Option<String>,
    pub location: Option<u32>,
    pub used: bool,
    /// Stack depth carried by the first reachable jump to the label.
    pub depth: Option<u32>,
}

impl LabelInfo {
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("L{index}"),
        }
    }
}

/// The emission target for one compiled unit.
///
/// Collects the symbolic instruction stream together with the literal
/// pool, line marks and exception regions. Offsets handed out while
/// emitting are the byte offsets the encoded stream will have, so
/// regions and lines can be recorded before labels are resolved.
///
/// The builder also follows the operand stack depth as code is emitted.
/// After a terminator the code is unreachable until a label that some
/// jump targets (or a handler) is marked, which restores the depth that
/// jump carried.
pub struct BytecodeBuilder {
    code: Vec<Symbolic>,
    ip: u32,
    labels: Vec<LabelInfo>,
    literals: LiteralPool,
    lines: LineTableBuilder,
    regions: RegionTracker,
    depth: u32,
    reachable: bool,
    region_depths: Vec<(String, u32)>,
}

impl BytecodeBuilder {
    pub fn new(first_line: u32) -> Self {
        Self {
            code: Vec::new(),
            ip: 0,
            labels: Vec::new(),
            literals: LiteralPool::new(),
            lines: LineTableBuilder::new(first_line),
            regions: RegionTracker::new(),
            depth: 0,
            reachable: true,
            region_depths: Vec::new(),
        }
    }

    /// Current byte offset in the instruction stream.
    pub fn current_offset(&self) -> u32 {
        self.ip
    }

    pub fn instruction_count(&self) -> usize {
        self.code.len()
    }

    pub fn literals(&self) -> &LiteralPool {
        &self.literals
    }

    /// Operand stack depth at the current offset.
    pub fn stack_depth(&self) -> u32 {
        self.depth
    }

    /// Whether control can reach the current offset.
    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    // ── labels ─────────────────────────────────────────────────────

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelInfo {
            name: None,
            location: None,
            used: false,
            depth: None,
        });
        Label((self.labels.len() - 1) as u32)
    }

    pub fn named_label(&mut self, name: &str) -> Label {
        let label = self.new_label();
        self.labels[label.index()].name = Some(name.to_string());
        label
    }

    /// Place `label` at the current offset.
    pub fn mark_label(&mut self, label: Label) -> Result<(), AssembleError> {
        let info = &mut self.labels[label.index()];
        if info.location.is_some() {
            return Err(AssembleError::LabelRedefined(
                info.display_name(label.index()),
            ));
        }
        info.location = Some(self.ip);
        if !self.reachable {
            if let Some(depth) = info.depth {
                self.depth = depth;
                self.reachable = true;
            }
        }
        Ok(())
    }

    pub fn label_location(&self, label: Label) -> Option<u32> {
        self.labels[label.index()].location
    }

    pub fn label_used(&self, label: Label) -> bool {
        self.labels[label.index()].used
    }

    // ── lines, literals, regions ───────────────────────────────────

    /// Code emitted from here on belongs to `line`.
    pub fn set_line(&mut self, line: u32) {
        self.lines.mark(self.ip, line);
    }

    pub fn current_line(&self) -> u32 {
        self.lines.current_line()
    }

    pub fn add_literal(&mut self, lit: Literal) -> u32 {
        self.literals.add(lit)
    }

    pub fn open_region(&mut self, name: &str) -> Result<u32, AssembleError> {
        let ip = self.regions.open_region(name, self.ip)?;
        self.region_depths.push((name.to_string(), self.depth));
        Ok(ip)
    }

    /// The handler is entered with the depth the region started at.
    pub fn mark_handler(&mut self, name: &str) -> Result<u32, AssembleError> {
        let ip = self.regions.mark_handler(name, self.ip)?;
        if let Some((_, depth)) =
            self.region_depths.iter().find(|(n, _)| n == name)
        {
            self.depth = *depth;
            self.reachable = true;
        }
        Ok(ip)
    }

    pub fn close_region(&mut self, name: &str) -> Result<u32, AssembleError> {
        self.regions.close_region(name, self.ip)
    }

    /// Leave `name`, and the regions still open inside it, unprotected
    /// until [`resume_regions`](Self::resume_regions).
    pub fn suspend_regions(&mut self, name: &str) -> Result<Suspension, AssembleError> {
        self.regions.suspend(name, self.ip)
    }

    pub fn resume_regions(&mut self, suspension: Suspension) -> Result<(), AssembleError> {
        self.regions.resume(suspension, self.ip)
    }

    // ── emit helpers ───────────────────────────────────────────────

    /// Emit `op` with explicit operands, checking the operand count.
    pub fn emit(
        &mut self,
        op: Op,
        args: &[Operand],
    ) -> Result<(), AssembleError> {
        if args.len() != op.operand_count() {
            return Err(AssembleError::OperandCount {
                op: op.mnemonic(),
                expected: op.operand_count(),
                got: args.len(),
            });
        }
        self.push_op(op, args);
        Ok(())
    }

    fn push_op(&mut self, op: Op, args: &[Operand]) {
        let mut ints = [0u32; 2];
        for (int, arg) in ints.iter_mut().zip(args) {
            match arg {
                Operand::Int(v) => *int = *v,
                Operand::Label(l) => self.labels[l.index()].used = true,
            }
        }
        let (pops, pushes) = op.stack_effect(&ints[..args.len()]);
        self.depth = self.depth.saturating_sub(pops) + pushes;

        if op.is_jump() && self.reachable {
            if let Some(Operand::Label(l)) = args.first() {
                let info = &mut self.labels[l.index()];
                if info.depth.is_none() {
                    info.depth = Some(self.depth);
                }
            }
        }
        if op.is_terminator() {
            self.reachable = false;
        }

        self.code.push(Symbolic::new(op, args));
        self.ip += op.width();
    }

    fn op0(&mut self, op: Op) {
        self.push_op(op, &[]);
    }

    fn op1(&mut self, op: Op, a: u32) {
        self.push_op(op, &[Operand::Int(a)]);
    }

    fn op2(&mut self, op: Op, a: u32, b: u32) {
        self.push_op(op, &[Operand::Int(a), Operand::Int(b)]);
    }

    fn jump(&mut self, op: Op, label: Label) {
        self.push_op(op, &[Operand::Label(label)]);
    }

    pub fn noop(&mut self) {
        self.op0(Op::Noop);
    }

    pub fn push_nil(&mut self) {
        self.op0(Op::PushNil);
    }

    pub fn push_true(&mut self) {
        self.op0(Op::PushTrue);
    }

    pub fn push_false(&mut self) {
        self.op0(Op::PushFalse);
    }

    pub fn push_self(&mut self) {
        self.op0(Op::PushSelf);
    }

    /// Push an integer, inline when it fits `i32`, else from the pool.
    pub fn push_int(&mut self, value: i64) {
        match i32::try_from(value) {
            Ok(v) => self.op1(Op::PushInt, v as u32),
            Err(_) => self.push_literal(Literal::Integer(value)),
        }
    }

    pub fn push_literal(&mut self, lit: Literal) {
        let idx = self.add_literal(lit);
        self.op1(Op::PushLiteral, idx);
    }

    /// A pool entry of its own that the code fills in at run time.
    pub fn new_cache(&mut self) -> u32 {
        self.add_literal(Literal::Cache)
    }

    pub fn push_cache(&mut self, slot: u32) {
        self.op1(Op::PushLiteral, slot);
    }

    pub fn set_cache(&mut self, slot: u32) {
        self.op1(Op::SetLiteral, slot);
    }

    pub fn push_symbol(&mut self, name: &str) {
        self.push_literal(Literal::symbol(name));
    }

    /// Push a fresh copy of a string literal.
    pub fn push_string(&mut self, s: &str) {
        self.push_literal(Literal::String(s.to_string()));
        self.op0(Op::StringDup);
    }

    pub fn push_local(&mut self, slot: u32, depth: u32) {
        if depth == 0 {
            self.op1(Op::PushLocal, slot);
        } else {
            self.op2(Op::PushLocalDepth, depth, slot);
        }
    }

    pub fn set_local(&mut self, slot: u32, depth: u32) {
        if depth == 0 {
            self.op1(Op::SetLocal, slot);
        } else {
            self.op2(Op::SetLocalDepth, depth, slot);
        }
    }

    pub fn passed_arg(&mut self, slot: u32) {
        self.op1(Op::PassedArg, slot);
    }

    pub fn push_ivar(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::PushIvar, idx);
    }

    pub fn set_ivar(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::SetIvar, idx);
    }

    pub fn push_global(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::PushGlobal, idx);
    }

    pub fn set_global(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::SetGlobal, idx);
    }

    /// Lexical constant lookup.
    pub fn push_const(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::PushConst, idx);
    }

    /// Constant lookup under the module on top of the stack.
    pub fn find_const(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::FindConst, idx);
    }

    pub fn push_cpath_top(&mut self) {
        self.op0(Op::PushCpathTop);
    }

    pub fn set_const(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::SetConst, idx);
    }

    pub fn set_const_at(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::SetConstAt, idx);
    }

    pub fn push_scope(&mut self) {
        self.op0(Op::PushScope);
    }

    pub fn push_block(&mut self) {
        self.op0(Op::PushBlock);
    }

    pub fn push_exception(&mut self) {
        self.op0(Op::PushException);
    }

    pub fn clear_exception(&mut self) {
        self.op0(Op::ClearException);
    }

    pub fn pop_exception(&mut self) {
        self.op0(Op::PopException);
    }

    pub fn pop(&mut self) {
        self.op0(Op::Pop);
    }

    pub fn dup(&mut self) {
        self.op0(Op::Dup);
    }

    pub fn swap(&mut self) {
        self.op0(Op::Swap);
    }

    /// Move the top value below the `count` values under it.
    pub fn move_down(&mut self, count: u32) {
        self.op1(Op::MoveDown, count);
    }

    pub fn goto(&mut self, label: Label) {
        self.jump(Op::Goto, label);
    }

    pub fn goto_if_false(&mut self, label: Label) {
        self.jump(Op::GotoIfFalse, label);
    }

    pub fn goto_if_true(&mut self, label: Label) {
        self.jump(Op::GotoIfTrue, label);
    }

    pub fn check_interrupts(&mut self) {
        self.op0(Op::CheckInterrupts);
    }

    pub fn ret(&mut self) {
        self.op0(Op::Ret);
    }

    /// Non-local return from a block.
    pub fn raise_return(&mut self) {
        self.op0(Op::RaiseReturn);
    }

    pub fn raise_break(&mut self) {
        self.op0(Op::RaiseBreak);
    }

    pub fn reraise(&mut self) {
        self.op0(Op::Reraise);
    }

    /// `receiver args.. -> result`
    pub fn send(&mut self, name: &str, argc: u32) {
        let idx = self.add_literal(Literal::symbol(name));
        if argc == 0 {
            self.op1(Op::SendMethod, idx);
        } else {
            self.op2(Op::SendStack, idx, argc);
        }
    }

    /// `receiver args.. block -> result`
    pub fn send_with_block(&mut self, name: &str, argc: u32) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op2(Op::SendStackWithBlock, idx, argc);
    }

    /// `receiver args.. splat block -> result`
    pub fn send_with_splat(&mut self, name: &str, argc: u32) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op2(Op::SendStackWithSplat, idx, argc);
    }

    /// `args.. block -> result`
    pub fn send_super(&mut self, name: &str, argc: u32) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op2(Op::SendSuper, idx, argc);
    }

    /// `args.. splat block -> result`
    pub fn send_super_with_splat(&mut self, name: &str, argc: u32) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op2(Op::SendSuperWithSplat, idx, argc);
    }

    pub fn create_block(&mut self, block: CompiledMethod) {
        let idx = self.add_literal(Literal::Method(Box::new(block)));
        self.op1(Op::CreateBlock, idx);
    }

    pub fn make_array(&mut self, count: u32) {
        self.op1(Op::MakeArray, count);
    }

    pub fn make_hash(&mut self, pairs: u32) {
        self.op1(Op::MakeHash, pairs);
    }

    pub fn cast_array(&mut self) {
        self.op0(Op::CastArray);
    }

    pub fn shift_array(&mut self) {
        self.op0(Op::ShiftArray);
    }

    pub fn string_build(&mut self, count: u32) {
        self.op1(Op::StringBuild, count);
    }

    pub fn is_nil(&mut self) {
        self.op0(Op::IsNil);
    }

    pub fn fetch_field(&mut self) {
        self.op0(Op::FetchField);
    }

    pub fn store_field(&mut self) {
        self.op0(Op::StoreField);
    }

    pub fn open_class(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::OpenClass, idx);
    }

    pub fn open_module(&mut self, name: &str) {
        let idx = self.add_literal(Literal::symbol(name));
        self.op1(Op::OpenModule, idx);
    }

    pub fn open_metaclass(&mut self) {
        self.op0(Op::OpenMetaclass);
    }

    /// Compile-and-invoke: run `body` with the module on the stack as
    /// self, leaving the body's value.
    pub fn run_body(&mut self, body: CompiledMethod) {
        let idx = self.add_literal(Literal::Method(Box::new(body)));
        self.op1(Op::RunBody, idx);
    }

    /// Install `method` as `name` on the module on the stack, leaving the
    /// name symbol.
    pub fn attach_method(&mut self, name: &str, method: CompiledMethod) {
        let name = self.add_literal(Literal::symbol(name));
        let method = self.add_literal(Literal::Method(Box::new(method)));
        self.op2(Op::AttachMethod, name, method);
    }

    // ── finishing ──────────────────────────────────────────────────

    /// Resolve labels, encode, and package the artifact.
    pub fn finish(self, info: MethodInfo) -> Result<CompiledMethod, AssembleError> {
        let instructions = assembler::translate(&self.code, &self.labels)?;
        let regions = self.regions.finish()?;
        let stack_size = stack::verify(&instructions, &regions.whole)?;
        let bytecode = assembler::encode(&instructions);
        let lines = self.lines.finish(self.ip);
        let exceptions = ExceptionTable::normalize(&regions.protected);
        log::debug!(
            "assembled `{}`: {} instructions, {} bytes, {} literals",
            info.name,
            instructions.len(),
            bytecode.len(),
            self.literals.len()
        );
        Ok(CompiledMethod {
            name: info.name,
            file: info.file,
            kind: info.kind,
            bytecode,
            literals: self.literals.into_vec(),
            required_args: info.required_args,
            total_args: info.total_args,
            splat_index: info.splat_index,
            local_count: info.local_names.len() as u32,
            local_names: info.local_names,
            exceptions,
            lines,
            primitive: info.primitive,
            stack_size,
        })
    }
}
