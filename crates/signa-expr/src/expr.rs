//! Expression trees.
//!
//! An [`Expr`] is a static tree of constants, uniform references, and
//! arithmetic operators, built with ordinary Rust operators:
//!
//! ```rust
//! use signa_expr::{Expr, Uniform};
//!
//! let v = Uniform::new(3.0);
//! let expr = Expr::var(&v) * 2.0 + 1.0;
//! assert_eq!(expr.variable_bound(), 3);
//! ```
//!
//! Every node advertises static upper bounds on the data slots, registers,
//! and instructions it needs; the compiler sums (or maxes) these across the
//! programs of one compilation to size its allocations before emitting a
//! single instruction.

use crate::uniform::Uniform;

/// A typed expression tree.
#[derive(Clone, Debug)]
pub enum Expr {
    /// Literal constant.
    Value(f32),
    /// Reference to a shared control value.
    Var(Uniform),
    /// Unary plus; compiles to its operand unchanged.
    Pos(Box<Expr>),
    /// Unary negation.
    Neg(Box<Expr>),
    /// Addition.
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction.
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication.
    Mul(Box<Expr>, Box<Expr>),
    /// Division.
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// References a uniform; repeated references to the same uniform share
    /// one data slot in the compiled program.
    pub fn var(uniform: &Uniform) -> Self {
        Self::Var(uniform.clone())
    }

    /// Wraps a literal value.
    pub fn value(value: f32) -> Self {
        Self::Value(value)
    }

    /// Unary plus; kept for completeness, the compiler emits nothing for it.
    pub fn pos(expr: Expr) -> Self {
        Self::Pos(Box::new(expr))
    }

    /// Upper bound on the data slots this tree needs.
    ///
    /// Constants count one slot each (they never share); variable
    /// references count one each before aliasing, so this is an upper
    /// bound, not an exact count.
    pub fn variable_bound(&self) -> usize {
        match self {
            Self::Value(_) | Self::Var(_) => 1,
            Self::Pos(e) | Self::Neg(e) => e.variable_bound(),
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.variable_bound() + r.variable_bound()
            }
        }
    }

    /// Upper bound on the scratch registers this tree needs.
    pub fn register_bound(&self) -> usize {
        match self {
            Self::Value(_) | Self::Var(_) => 1,
            Self::Pos(e) | Self::Neg(e) => e.register_bound() + 1,
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.register_bound() + r.register_bound() + 1
            }
        }
    }

    /// Upper bound on the instructions this tree emits.
    pub fn instruction_bound(&self) -> usize {
        match self {
            Self::Value(_) | Self::Var(_) => 1,
            Self::Pos(e) | Self::Neg(e) => e.instruction_bound() + 1,
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.instruction_bound() + r.instruction_bound() + 1
            }
        }
    }
}

impl From<f32> for Expr {
    fn from(value: f32) -> Self {
        Self::Value(value)
    }
}

impl From<&Uniform> for Expr {
    fn from(uniform: &Uniform) -> Self {
        Self::Var(uniform.clone())
    }
}

impl core::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

macro_rules! expr_binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl core::ops::$trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs))
            }
        }

        impl core::ops::$trait<f32> for Expr {
            type Output = Expr;
            fn $method(self, rhs: f32) -> Expr {
                Expr::$variant(Box::new(self), Box::new(Expr::Value(rhs)))
            }
        }

        impl core::ops::$trait<Expr> for f32 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$variant(Box::new(Expr::Value(self)), Box::new(rhs))
            }
        }
    };
}

expr_binary_op!(Add, add, Add);
expr_binary_op!(Sub, sub, Sub);
expr_binary_op!(Mul, mul, Mul);
expr_binary_op!(Div, div, Div);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_bounds() {
        let e = Expr::value(1.0);
        assert_eq!(
            (e.variable_bound(), e.register_bound(), e.instruction_bound()),
            (1, 1, 1)
        );
        let u = Uniform::new(0.0);
        let e = Expr::var(&u);
        assert_eq!(
            (e.variable_bound(), e.register_bound(), e.instruction_bound()),
            (1, 1, 1)
        );
    }

    #[test]
    fn test_binary_bounds_compose() {
        let u = Uniform::new(0.0);
        let e = Expr::var(&u) + 2.0;
        assert_eq!(e.variable_bound(), 2);
        assert_eq!(e.register_bound(), 3);
        assert_eq!(e.instruction_bound(), 3);
    }

    #[test]
    fn test_unary_adds_one() {
        let e = -(Expr::value(1.0) * 2.0);
        assert_eq!(e.variable_bound(), 2);
        assert_eq!(e.register_bound(), 4);
        assert_eq!(e.instruction_bound(), 4);
    }

    #[test]
    fn test_operator_mixing_with_f32() {
        let u = Uniform::new(0.0);
        // all four operators accept f32 on either side
        let _ = 1.0f32 + Expr::var(&u);
        let _ = Expr::var(&u) - 1.0;
        let _ = 2.0f32 * Expr::var(&u);
        let _ = Expr::var(&u) / 2.0;
    }
}
