//! Cursor-based builder for task bodies.
//!
//! Instructions are appended to the current block. Construction errors
//! (for example appending after a terminator) are remembered and reported
//! once by [`FunctionBuilder::finish`], which also runs the verifier.

use super::function::Function;
use super::inst::{BinaryOp, BlockId, Callee, ComparePred, InstId, InstKind, Value};
use crate::utils::errors::IrError;

/// Builder for a [`Function`].
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
    error: Option<IrError>,
}

impl FunctionBuilder {
    /// Start a function; the cursor is placed in its entry block.
    pub fn new(name: impl Into<String>, num_params: u32) -> Self {
        let func = Function::new(name, num_params);
        let current = func.entry();
        Self { func, current, error: None }
    }

    /// Create a block without moving the cursor.
    pub fn block(&mut self, name: &str) -> BlockId {
        self.func.add_block(name)
    }

    /// Move the cursor to the end of `bb`.
    pub fn position_at(&mut self, bb: BlockId) -> &mut Self {
        self.current = bb;
        self
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn entry(&self) -> BlockId {
        self.func.entry()
    }

    /// Append an arbitrary instruction at the cursor.
    pub fn push(&mut self, kind: InstKind) -> InstId {
        match self.func.append_inst(self.current, kind) {
            Ok(id) => id,
            Err(e) => {
                self.error.get_or_insert(e);
                InstId(u32::MAX)
            }
        }
    }

    pub fn phi(&mut self, incoming: Vec<(BlockId, Value)>) -> InstId {
        self.push(InstKind::Phi { incoming })
    }

    /// Add an incoming pair to an existing merge parameter.
    pub fn add_incoming(&mut self, phi: InstId, bb: BlockId, value: Value) -> &mut Self {
        if let Err(e) = self.func.add_phi_incoming(phi, bb, value) {
            self.error.get_or_insert(e);
        }
        self
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> InstId {
        self.push(InstKind::Binary { op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: Value, rhs: Value) -> InstId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn compare(&mut self, pred: ComparePred, lhs: Value, rhs: Value) -> InstId {
        self.push(InstKind::Compare { pred, lhs, rhs })
    }

    pub fn alloca(&mut self) -> InstId {
        self.push(InstKind::Alloca)
    }

    pub fn load(&mut self, ptr: Value) -> InstId {
        self.push(InstKind::Load { ptr })
    }

    pub fn store(&mut self, ptr: Value, value: Value) -> InstId {
        self.push(InstKind::Store { ptr, value })
    }

    /// Call an external function by name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> InstId {
        self.push(InstKind::Call { callee: Callee::External(name.to_string()), args })
    }

    pub fn br(&mut self, target: BlockId) -> InstId {
        self.push(InstKind::Br { target })
    }

    pub fn cond_br(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) -> InstId {
        self.push(InstKind::CondBr { cond, then_block, else_block })
    }

    pub fn ret(&mut self, value: Option<Value>) -> InstId {
        self.push(InstKind::Ret { value })
    }

    /// Finish construction and verify the result.
    pub fn finish(self) -> Result<Function, IrError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.func.verify()?;
        Ok(self.func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_counted_loop() {
        let mut b = FunctionBuilder::new("count", 1);
        let header = b.block("header");
        let body = b.block("body");
        let exit = b.block("exit");
        let entry = b.entry();
        b.br(header);

        b.position_at(header);
        let i = b.phi(vec![(entry, Value::Const(0))]);
        let cond = b.compare(ComparePred::Lt, i.into(), Value::Arg(0));
        b.cond_br(cond.into(), body, exit);

        b.position_at(body);
        b.call("work", vec![i.into()]);
        let next = b.add(i.into(), Value::Const(1));
        b.br(header);
        b.add_incoming(i, body, next.into());

        b.position_at(exit);
        b.ret(None);

        let f = b.finish().unwrap();
        assert_eq!(f.num_blocks(), 4);
        assert_eq!(f.predecessors(header).unwrap(), vec![entry, body]);
    }

    #[test]
    fn test_error_reported_on_finish() {
        let mut b = FunctionBuilder::new("bad", 0);
        b.ret(None);
        b.alloca();
        let entry = b.entry();
        assert_eq!(b.finish().unwrap_err(), IrError::BlockTerminated(entry));
    }

    #[test]
    fn test_unterminated_block_fails_verification() {
        let mut b = FunctionBuilder::new("open", 0);
        b.alloca();
        let entry = b.entry();
        assert_eq!(b.finish().unwrap_err(), IrError::MissingTerminator(entry));
    }
}
