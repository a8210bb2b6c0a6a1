mod coordinator;
mod engine;
mod support;
