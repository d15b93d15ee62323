//! dclift — lifts target-native machine code into a typed, language-neutral
//! IR by dynamic compilation.
//!
//! The crate has two halves. At build time, the [`sema`] module flattens a
//! target's declarative per-instruction patterns into linear semantic
//! bytecode and consolidates them into three parallel tables (a target
//! crate typically drives this from its `build.rs` and embeds the emitted
//! source). At run time, the [`translate`] module walks those tables for
//! each decoded instruction ([`mc`]) and emits IR ([`ir`]) mirroring the
//! machine code's control flow, with the architectural state held in an
//! explicit register-set aggregate.
//!
//! Targets plug in through [`translate::TargetHooks`] (custom operands,
//! target-specific opcodes, implicit registers, intrinsics, and optional
//! whole-instruction overrides) and a [`translate::RegSetLayout`] describing
//! their register file.

pub mod error;
pub mod ir;
pub mod mc;
pub mod sema;
pub mod translate;

pub use error::{SemaError, SemaResult, TranslateError, TranslateResult};
