pub mod cerebras;
pub mod mock;
pub mod openai;
pub mod sse;
pub mod voyage;

pub use cerebras::CerebrasClient;
pub use mock::{MockChatModel, MockEmbedder};
pub use openai::{OpenAiChatClient, OpenAiEmbedder};
pub use voyage::VoyageEmbedder;
