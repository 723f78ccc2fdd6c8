pub mod binder;
pub mod registry;
pub mod value;

pub use registry::{PreparedStatement, StatementRegistry, StatementRef};
pub use value::TaggedValue;
