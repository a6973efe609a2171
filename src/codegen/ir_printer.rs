//! Listing of task-body IR.
//!
//! ```text
//! func @task(5 params) {
//! bb0:  ; entry
//!     %0 = alloca
//!     br bb1
//! ...
//! }
//! ```

use crate::ir::{Function, InstId, InstKind, Task};
use crate::utils::errors::IrError;
use crate::utils::pretty::{format_list, CodeFormatter};

/// Render one instruction without indentation.
pub fn format_inst(func: &Function, id: InstId) -> Result<String, IrError> {
    let text = match func.kind(id)? {
        InstKind::Phi { incoming } => {
            let arms: Vec<String> = incoming.iter().map(|(bb, v)| format!("[{}: {}]", bb, v)).collect();
            format!("{} = phi {}", id, arms.join(", "))
        }
        InstKind::Binary { op, lhs, rhs } => format!("{} = {} {}, {}", id, op.mnemonic(), lhs, rhs),
        InstKind::Compare { pred, lhs, rhs } => format!("{} = cmp {} {}, {}", id, pred.mnemonic(), lhs, rhs),
        InstKind::Alloca => format!("{} = alloca", id),
        InstKind::Load { ptr } => format!("{} = load {}", id, ptr),
        InstKind::Store { ptr, value } => format!("store {}, {}", ptr, value),
        InstKind::SlotAddress { base, offset } => format!("{} = slot_addr {} + {}", id, base, offset),
        InstKind::Call { callee, args } => format!("{} = call {}({})", id, callee, format_list(args, ", ")),
        InstKind::Br { target } => format!("br {}", target),
        InstKind::CondBr { cond, then_block, else_block } => format!("condbr {}, {}, {}", cond, then_block, else_block),
        InstKind::Ret { value: Some(v) } => format!("ret {}", v),
        InstKind::Ret { value: None } => "ret".to_string(),
    };
    Ok(text)
}

fn print_with<F>(func: &Function, annotate: F) -> Result<String, IrError>
where
    F: Fn(InstId) -> Option<String>,
{
    let mut f = CodeFormatter::new("    ");
    f.line(format!("func @{}({} params) {{", func.name, func.num_params));
    for bb in func.block_ids() {
        let block = func.block(bb)?;
        f.line(format!("{}:  ; {}", bb, block.name));
        f.indent();
        for &id in &block.insts {
            let mut line = format_inst(func, id)?;
            if let Some(note) = annotate(id) {
                line.push_str("  ; ");
                line.push_str(&note);
            }
            f.line(line);
        }
        f.dedent();
    }
    f.line("}");
    Ok(f.finish())
}

/// Render a whole function.
pub fn print_function(func: &Function) -> Result<String, IrError> {
    print_with(func, |_| None)
}

/// Render a task body, marking the synchronization calls it carries.
pub fn print_task(task: &Task) -> Result<String, IrError> {
    let mut out = format!(
        "; task header {}, {} waits, {} signals{}\n",
        task.header,
        task.waits().len(),
        task.signals().len(),
        if task.is_sealed() { ", sealed" } else { "" }
    );
    out.push_str(&print_with(&task.body, |id| {
        if task.waits().contains(&id) {
            Some("wait".to_string())
        } else if task.signals().contains(&id) {
            Some("signal".to_string())
        } else {
            None
        }
    })?);
    Ok(out)
}
