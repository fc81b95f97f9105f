pub mod anthropic;
pub mod canonical;
pub mod frame;
pub mod openai;
pub mod sse;
