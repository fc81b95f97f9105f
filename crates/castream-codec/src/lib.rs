pub mod event_translator;
pub mod frame_parser;

pub use event_translator::{EventTranslator, TranslatorOptions};
pub use frame_parser::{FrameParser, FrameParserPolicy, ParserOutcome};
