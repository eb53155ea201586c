pub mod dose_record;
pub mod enums;
pub mod user;

pub use dose_record::*;
pub use enums::*;
pub use user::*;
