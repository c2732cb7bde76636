pub mod chat;
pub mod response;

pub use chat::{AudioFormat, AudioUpload, ChatReply, ChatRequestBody, TranscriptionResponse};
pub use response::HttpResponse;
