pub mod http;
pub mod llm;
pub mod okx;
pub mod persistence;
pub mod sim;
