pub mod classifier;
pub mod exchange;
pub mod extractor;
pub mod interpreter;
pub mod model;
pub mod recorder;

// Re-export commonly used types for convenient access
pub use classifier::classify;
pub use exchange::{ContentHandle, Exchange, ExchangeRecord, ExchangeRequest};
pub use extractor::extract_query;
pub use interpreter::interpret_response;
pub use model::{CapturedRequest, Filter, Query, ResponseEnvelope};
pub use recorder::{Recorder, Timeline};
