//! Signa Core - signal-graph rendering engine
//!
//! This crate evaluates directed graphs of signal-producing nodes into
//! audio-rate sample buffers, one control tick at a time.
//!
//! # Subsystems
//!
//! ## Sample memory
//!
//! - [`pool::TransientPool`] - bump-allocated page store, rewound between
//!   processes; scratch buffers live for at most one descent
//! - [`pool::PersistentPool`] - bitmap-managed page store whose blocks
//!   survive across ticks until explicitly released
//! - [`vector::VectorFile`] - indexed table of logical buffers whose
//!   backing memory is realized lazily from the pools
//!
//! ## Graph management
//!
//! - [`Engine::attach`] runs convergence analysis: each node reachable from
//!   the new root is assigned the number of paths terminating at it; nodes
//!   referenced more than once become *cache points* whose output is
//!   materialized once per tick and shared by all consumers
//! - [`Engine::detach`] reverses the analysis and releases nodes whose
//!   count reaches zero
//!
//! ## Rendering
//!
//! - [`Engine::render`] walks each attached graph depth-first per tick,
//!   visiting a node's first child inline (the branch return vector doubles
//!   as the accumulator) and forking a fresh branch for every further child
//! - [`Engine::sync`] advances node state machines at the control rate
//!   without allocating any sample memory
//!
//! # Node authoring
//!
//! Implement [`Node`]: declare input gates via
//! [`gate_count`](Node::gate_count), render into
//! [`RenderContext::output`], read inputs through
//! [`RenderContext::input`]. Sample spans are `&[Cell<f32>]` because a
//! node's first input is typically bound to the same vector it writes.
//!
//! ```rust
//! use signa_core::{Engine, nodes::{Mixer, Tap}, Node, RenderContext, pcm};
//!
//! struct Dc(f32);
//!
//! impl Node for Dc {
//!     fn render(&mut self, ctx: &RenderContext<'_>) -> bool {
//!         if ctx.additive() {
//!             pcm::accumulate(ctx.output(), self.0);
//!         } else {
//!             pcm::fill(ctx.output(), self.0);
//!         }
//!         true
//!     }
//! }
//!
//! let mut engine = Engine::new();
//! let a = engine.add_node(Dc(0.25));
//! let b = engine.add_node(Dc(0.5));
//! let mix = engine.add_node(Mixer::new(2));
//! let tap = Tap::new();
//! let sink = tap.sink();
//! let root = engine.add_node(tap);
//! engine.connect(mix, 0, a).unwrap();
//! engine.connect(mix, 1, b).unwrap();
//! engine.connect(root, 0, mix).unwrap();
//! engine.attach(root).unwrap();
//! assert!(engine.render(0.01));
//! assert!(sink.lock().unwrap().iter().all(|&s| s == 0.75));
//! ```
//!
//! # no_std Support
//!
//! The crate is `no_std` compatible with `alloc`; disable the default
//! `std` feature. [`nodes::Tap`] is std-only.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod context;
pub mod engine;
pub mod error;
pub mod format;
pub mod node;
pub mod nodes;
pub mod pcm;
pub mod pool;
pub mod process;
mod scheduler;
pub mod vector;

pub use context::RenderContext;
pub use engine::{DEFAULT_CONTROL_RATE, DEFAULT_SAMPLE_RATE, Engine, MIN_SAMPLE_RATE};
pub use error::EngineError;
pub use format::SampleFormat;
pub use node::{Node, NodeId};
pub use pool::{BLOCK_SAMPLES, PAGE_SAMPLES};
pub use process::{ProcessState, ReturnFlags};
pub use vector::VectorId;
