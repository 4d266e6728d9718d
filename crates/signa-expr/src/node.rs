//! Expression leaf node.
//!
//! [`Expression`] is the bridge between compiled programs and the engine's
//! render scheduler: a gate-less [`Node`] that evaluates its first program
//! once per tick and writes the scalar result across the output span
//! (or accumulates it, when the tick is additive).

use signa_core::{Node, RenderContext, pcm};

use crate::compile::Microcode;
use crate::error::{CompileError, ExecError};
use crate::expr::Expr;
use crate::vm::execute;

/// Leaf node evaluating compiled expression programs.
pub struct Expression {
    code: Microcode,
    regs: Vec<f32>,
}

impl Expression {
    /// Compiles a single expression into a renderable node.
    pub fn new(expr: impl Into<Expr>) -> Result<Self, CompileError> {
        Self::with_programs(&[expr.into()])
    }

    /// Compiles several programs into one node. Program 0 drives
    /// [`render`](Node::render); the rest are evaluated through
    /// [`eval`](Expression::eval) by whatever host logic owns the node.
    pub fn with_programs(programs: &[Expr]) -> Result<Self, CompileError> {
        let code = Microcode::compile(programs)?;
        let regs = vec![0.0; code.register_count()];
        Ok(Self { code, regs })
    }

    /// The compiled artifact.
    pub fn microcode(&self) -> &Microcode {
        &self.code
    }

    /// Evaluates program `program` against the node's register file.
    pub fn eval(&mut self, program: usize) -> Result<f32, ExecError> {
        execute(
            self.code.program(program),
            self.code.data(),
            &mut self.regs,
        )
    }
}

impl Node for Expression {
    fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
        match self.eval(0) {
            Ok(value) => {
                if ctx.additive() {
                    pcm::accumulate(ctx.output(), value);
                } else {
                    pcm::fill(ctx.output(), value);
                }
                true
            }
            Err(error) => {
                tracing::debug!(%error, "expression evaluation failed");
                false
            }
        }
    }
}
