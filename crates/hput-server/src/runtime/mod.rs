pub mod context;
pub mod event_loop;
pub mod job_executor;
pub mod request;
pub mod response;

mod bindings;
mod conversions;


pub use bindings::MAX_FETCH_BODY;
pub use context::{ExecutionContext, Sandbox};
pub use event_loop::{Clock, DrainOutcome, EventLoop, ManualClock, SystemClock, TimerId};
pub use job_executor::MicrotaskQueue;
pub use request::RequestView;
pub use response::ResponseSink;
