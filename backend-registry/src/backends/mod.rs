pub mod llm;
pub mod mock;
pub mod nllb;
