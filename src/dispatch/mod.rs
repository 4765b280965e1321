pub mod dispatcher;

pub use dispatcher::{Task, TaskDispatcher};
