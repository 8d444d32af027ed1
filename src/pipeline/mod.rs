//! Response pipeline: token gate plus the LLM and speech stages.

mod gate;
mod responder;

pub use gate::ResponseGate;
pub use responder::{
    APOLOGY_TEXT, ResponderControl, SpeakerControl, SpeechTask, run_response_stage,
    run_speaker_stage,
};
