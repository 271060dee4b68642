//! hput Common Types
//!
//! This crate holds the data model and error taxonomy shared by every hput
//! component:
//!
//! - **Runnables**: the artifact stored at a URL path ([`Runnable`], [`Payload`], [`Kind`])
//! - **Write results**: what a `PUT` reports back ([`PutResult`])
//! - **Errors**: input, execution and backend faults ([`HputError`], [`ExecutionError`])
//!
//! # Example
//!
//! ```
//! use hput_common::{Kind, Payload, Runnable};
//!
//! let runnable = Runnable::new("/greet", Payload::Script("'hi ' + 1".into()));
//! assert_eq!(runnable.kind(), Kind::Script);
//! assert_eq!(runnable.text(), Some("'hi ' + 1"));
//! ```

pub mod error;
pub mod runnable;


pub use error::{ExecutionError, HputError, Result};
pub use runnable::{Kind, Payload, PutResult, Runnable};
