//! The runtime half of the crate: the register-set abstraction, the target
//! hook surface, and the translator that walks semantic streams to emit IR.

pub mod hooks;
pub mod regset;
pub mod translator;

pub use hooks::{NoHooks, OpEmitter, TargetHooks};
pub use regset::{RegSetLayout, RegSetSema, RegSlot};
pub use translator::{TranslateOpts, TranslatedInst, Translator};
