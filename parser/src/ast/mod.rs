pub use expr::*;
pub use value_type::*;
pub use walk::*;

mod expr;
mod value_type;
mod walk;
