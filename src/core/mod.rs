pub mod condition;
pub mod error;
pub mod tuple;
pub mod value;

pub use condition::{Condition, Direction};
pub use error::{Result, StoreError};
pub use tuple::{Entry, Tuple};
pub use value::Component;
