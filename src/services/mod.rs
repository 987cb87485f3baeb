pub mod export;
pub mod image;
pub mod llm;
pub mod session;
pub mod story;
pub mod viewer;
pub mod workflow;

#[cfg(test)]
pub(crate) mod mocks;
