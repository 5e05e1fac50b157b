pub mod aws;
pub mod dialogue;
pub mod extraction;
pub mod listener;
pub mod llm;
pub mod publisher;
pub mod retry;
pub mod splitter;
pub mod tts;
pub mod workflow;
