//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` pick up every row type.

pub mod notification;
pub mod preference;
pub mod template;

pub use self::notification::*;
pub use self::preference::*;
pub use self::template::*;
