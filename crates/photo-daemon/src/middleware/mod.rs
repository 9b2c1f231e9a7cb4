pub mod request_counter;

pub use request_counter::{request_counter_layer, RequestCounterLayer};
