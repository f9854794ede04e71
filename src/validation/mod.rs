//! Update validation: ordered validation functions run on every allowed write.

mod pipeline;

pub use pipeline::{ValidationPipeline, ValidationFn, ValidationInput, ValidationOutcome, NativeValidator};
