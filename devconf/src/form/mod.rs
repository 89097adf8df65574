//! Compilation of schema nodes into renderable form fields.

pub mod compiler;
pub mod field;
pub mod group;

pub use compiler::{FormCompiler, FormParams, is_edit_mode};
pub use field::{ChildOption, Control, FormField, SelectOption, Validation};
pub use group::{Group, show_next_group};
