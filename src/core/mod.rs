pub mod assembler;
pub mod etl;
pub mod extractor;
pub mod mapping;
pub mod parser;
pub mod path;
pub mod pipeline;
pub mod preprocess;
pub mod transform;
pub mod writer;
pub mod xml;

pub use crate::domain::model::{Record, Table, TransformResult};
pub use crate::domain::ports::{ConfigProvider, OutputLayout, Pipeline, Storage};
pub use crate::utils::error::Result;
