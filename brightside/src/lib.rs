// Library interface for brightside modules
// This allows tests and other binaries to import modules

pub mod handlers;
pub mod llm;
pub mod server;
