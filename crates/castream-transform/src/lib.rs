pub mod request;
pub mod response;

pub use request::{decode_anthropic, decode_openai};
pub use response::{
    encode_anthropic_event, encode_openai_chunk, encode_openai_done,
    synthesize_anthropic_response, synthesize_openai_response, OpenAiStreamState,
};
