pub mod duration;
pub mod hash;
pub mod histogram;
pub mod label;

pub mod prelude {
    pub use crate::duration::*;
    pub use crate::hash::*;
    pub use crate::histogram::*;
    pub use crate::label::*;
}
