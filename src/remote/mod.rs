//! Remote conversation backends

mod assist;
mod llm;

pub use assist::HomeAssistantAssist;
pub use llm::OpenAiChat;
