/// Runtime support for loaded types
///
/// - value: values produced and consumed by generated code
/// - vm: the stack machine that runs method bodies
mod value;
pub mod vm;

pub use value::Value;
pub use vm::VmFault;
