//! Signa Expr - expression compiler and VM for signa leaf nodes
//!
//! Static, typed expression trees compile into a tiny three-address
//! bytecode that leaf nodes execute during their `render` step:
//!
//! ```rust
//! use signa_core::{Engine, nodes::Tap};
//! use signa_expr::{Expr, Expression, Uniform};
//!
//! let freq = Uniform::new(3.0);
//! let node = Expression::new(Expr::var(&freq) + 2.0).unwrap();
//!
//! let mut engine = Engine::new();
//! let leaf = engine.add_node(node);
//! let tap = Tap::new();
//! let sink = tap.sink();
//! let root = engine.add_node(tap);
//! engine.connect(root, 0, leaf).unwrap();
//! engine.attach(root).unwrap();
//!
//! assert!(engine.render(0.01));
//! assert!(sink.lock().unwrap().iter().all(|&s| s == 5.0));
//!
//! // retune without recompiling
//! freq.set(-4.0);
//! assert!(engine.render(0.01));
//! assert!(sink.lock().unwrap().iter().all(|&s| s == -2.0));
//! ```
//!
//! # Pieces
//!
//! - [`Expr`] - expression trees built with ordinary Rust operators
//! - [`Uniform`] - shared control values referenced by expressions
//! - [`Microcode`] - the compiled artifact: code, data table, programs
//! - [`execute`] - the register-file VM
//! - [`Expression`] - the leaf [`Node`](signa_core::Node) tying it together
//!
//! The compiler sizes every allocation up front from the static bounds the
//! trees advertise, rounded to 16-register / 64-instruction pages, so the
//! emitted program always fits the budget the node allocates.

pub mod compile;
pub mod error;
pub mod expr;
pub mod micro;
pub mod node;
pub mod uniform;
pub mod vm;

pub use compile::Microcode;
pub use error::{CompileError, ExecError};
pub use expr::Expr;
pub use micro::{DataSlot, Dst, INSTRUCTION_PAGE, Micro, MicroFlags, OpCode, REGISTER_PAGE, Src};
pub use node::Expression;
pub use uniform::Uniform;
pub use vm::execute;
